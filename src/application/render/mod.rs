//! The render pipeline: wire codec, HTTP client, debounced scheduler, and
//! server monitor.

pub mod client;
pub mod codec;
pub mod monitor;
pub mod scheduler;

pub use client::{
    DiagramRenderer, PROBE_DIAGRAM, RenderClient, RenderFailure, RenderOutcome, ServerProbe,
};
pub use monitor::{MonitorSnapshot, ServerMonitor};
pub use scheduler::{PreviewSnapshot, RenderScheduler};
