mod base;
mod dispatcher;
mod ingestor;
mod stream;

pub use base::*;
pub use dispatcher::*;
pub use ingestor::*;
pub use stream::*;
