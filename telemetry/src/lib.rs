//! Logging and metrics setup shared by the dispatcher services and tests.

pub mod metrics;
pub mod tracing;
