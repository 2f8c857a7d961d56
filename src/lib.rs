//! Render pipeline for a PlantUML diagram editor.
//!
//! Diagram source text is encoded into a PlantUML server URL, fetched over
//! HTTP, classified, and cached by exact source text for reuse and offline
//! fallback. A debounced scheduler coalesces bursts of edits into single
//! fetches and resolves races between overlapping ones, while a monitor
//! tracks server reachability and raises a degraded-mode signal when the
//! server disappears. The server can be the public remote instance or a
//! locally supervised picoweb process.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
