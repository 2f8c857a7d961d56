//! Infrastructure: telemetry, process supervision, shared error types.

pub mod embedded;
pub mod error;
pub mod telemetry;
