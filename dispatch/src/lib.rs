//! Bounded multi-stream message dispatch.
//!
//! A [`dispatcher::Dispatcher`] owns one [`processor::StreamProcessor`] per message kind. Each
//! processor couples a fixed-capacity channel with a pool of workers running the handler
//! registered for that kind. Producers submit messages concurrently, workers drain the channels
//! in FIFO order, and shutdown stops every stream at once while letting accepted messages
//! finish.
//!
//! Inbound transports plug in through [`transport::Subscription`] and
//! [`transport::QueueConsumer`].

pub mod concurrency;
pub mod dispatcher;
pub mod error;
pub mod handler;
mod macros;
pub mod metrics;
pub mod processor;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod types;
pub mod workers;
