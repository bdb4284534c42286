use thiserror::Error;

use crate::shared::MessageKind;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("`{field}` {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// No stream is configured.
    #[error("at least one stream must be configured")]
    NoStreams,
    /// The same message kind is configured more than once.
    #[error("stream `{0}` is configured more than once")]
    DuplicateStream(MessageKind),
}
