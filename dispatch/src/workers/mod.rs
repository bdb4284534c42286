//! Workers draining stream channels and the policies applied to their results.

pub mod policy;
pub mod pool;
pub mod reporter;
