use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ProcessingResult;
use crate::types::Message;

/// Business logic run for every message of one kind.
///
/// A handler is shared by all workers of its stream, so `handle` may be called concurrently up
/// to the stream's parallelism. Failures are returned as [`crate::error::ProcessingError`] and
/// reported, never retried in process. A panic inside `handle` is caught by the worker and
/// reported as a permanent failure of that message only.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> impl Future<Output = ProcessingResult<()>> + Send;
}

impl<H> Handler for Arc<H>
where
    H: Handler,
{
    fn handle(&self, message: Message) -> impl Future<Output = ProcessingResult<()>> + Send {
        H::handle(self, message)
    }
}

/// Object safe view of [`Handler`] so streams with different handler types can be stored
/// together.
pub(crate) trait DynHandler: Send + Sync + 'static {
    fn handle_boxed(&self, message: Message) -> BoxFuture<'_, ProcessingResult<()>>;
}

impl<H> DynHandler for H
where
    H: Handler,
{
    fn handle_boxed(&self, message: Message) -> BoxFuture<'_, ProcessingResult<()>> {
        Box::pin(self.handle(message))
    }
}

pub(crate) type BoxedHandler = Arc<dyn DynHandler>;

pub(crate) fn box_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}
