//! Concurrency primitives shared by producers, workers and the service shell.
//!
//! [`channel`] holds the bounded queue each stream is built on, [`shutdown`] the broadcast
//! signal used to stop inbound transports before the dispatcher drains.

pub mod channel;
pub mod shutdown;
