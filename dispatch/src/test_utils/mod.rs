//! Helpers for exercising dispatchers in tests.

pub mod handler;
pub mod notify;
pub mod reporter;
