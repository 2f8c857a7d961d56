//! Content-addressed render cache.
//!
//! Maps exact diagram source text to the most recently fetched image for it,
//! bounded by entry count and persisted best-effort across sessions. The
//! cache is a performance and offline aid, never a correctness-critical
//! store: persistence failures degrade to an empty or unsaved cache.

mod lock;
mod persist;
mod store;

pub use store::{CacheEntry, DEFAULT_MAX_ENTRIES, RenderCache};
