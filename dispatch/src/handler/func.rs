use std::fmt;
use std::future::Future;

use crate::error::ProcessingResult;
use crate::handler::Handler;
use crate::types::Message;

/// [`Handler`] backed by an async closure, see [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps a closure returning a future into a [`Handler`].
///
/// ```
/// use dispatch::error::ProcessingError;
/// use dispatch::handler::handler_fn;
/// use dispatch::types::Message;
///
/// let handler = handler_fn(|message: Message| async move {
///     tracing::info!(bytes = message.payload().len(), "handled");
///     Ok::<_, ProcessingError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<()>> + Send,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessingResult<()>> + Send,
{
    fn handle(&self, message: Message) -> impl Future<Output = ProcessingResult<()>> + Send {
        (self.f)(message)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}
