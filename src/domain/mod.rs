//! Core domain types shared across the render pipeline.

pub mod diagram;
pub mod status;

pub use diagram::{DiagramSource, ImageFormat};
pub use status::ServerStatus;
