mod base;
mod func;

pub use base::Handler;
pub(crate) use base::{BoxedHandler, box_handler};
pub use func::{HandlerFn, handler_fn};
