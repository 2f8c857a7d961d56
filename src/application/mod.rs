//! Application services: the render pipeline and the wiring around it.

pub mod context;
pub mod error;
pub mod render;
