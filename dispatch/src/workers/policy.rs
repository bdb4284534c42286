use crate::error::{ErrorClass, ErrorKind};

/// Returns the class assigned to an [`ErrorKind`] when the handler did not set one.
///
/// Only failures of external collaborators that are expected to recover by themselves are
/// transient. Anything caused by the message content or by a crashing handler is permanent.
pub fn default_error_class(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::StoreUnavailable
        | ErrorKind::StoreWriteFailed
        | ErrorKind::IoError
        | ErrorKind::Timeout => ErrorClass::Transient,

        ErrorKind::InvalidMessage
        | ErrorKind::DeserializationError
        | ErrorKind::HandlerFailed
        | ErrorKind::HandlerPanic
        | ErrorKind::WorkerPanic
        | ErrorKind::Unknown => ErrorClass::Permanent,
    }
}
