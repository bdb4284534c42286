//! Error types of the dispatch core.
//!
//! [`ProcessingError`] describes why a single message could not be handled. It carries a
//! granular [`ErrorKind`], the [`ErrorClass`] used by reporters, the kind of the failing
//! message and the callsite that created it. The caller-facing errors returned by
//! [`crate::dispatcher::Dispatcher`] operations are plain enums and always hand the
//! rejected message back.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Message, MessageKind};
use crate::workers::policy::default_error_class;

/// Result type returned by message handlers.
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Whether the failure of a message is expected to go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A collaborator was unavailable, the same message may succeed later.
    Transient,
    /// The message itself cannot be processed.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of message processing failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Message content
    InvalidMessage,
    DeserializationError,

    // External collaborators
    StoreUnavailable,
    StoreWriteFailed,
    IoError,
    Timeout,

    // Handler execution
    HandlerFailed,
    HandlerPanic,
    WorkerPanic,

    Unknown,
}

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    class: Option<ErrorClass>,
    message_kind: Option<MessageKind>,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Failure of a single message, reported but never retried in process.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    payload: Box<ErrorPayload>,
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the class of this error.
    ///
    /// Falls back to the default class of the [`ErrorKind`] unless one was set explicitly
    /// with [`ProcessingError::with_class`].
    pub fn class(&self) -> ErrorClass {
        self.payload
            .class
            .unwrap_or_else(|| default_error_class(self.payload.kind))
    }

    /// Kind of the message that failed, set by the worker that ran the handler.
    pub fn message_kind(&self) -> Option<MessageKind> {
        self.payload.message_kind
    }

    pub fn description(&self) -> &str {
        &self.payload.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Overrides the class derived from the error kind.
    pub fn with_class(mut self, class: ErrorClass) -> Self {
        self.payload.class = Some(class);
        self
    }

    pub fn with_message_kind(mut self, message_kind: MessageKind) -> Self {
        self.payload.message_kind = Some(message_kind);
        self
    }

    /// Attaches the originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        ProcessingError {
            payload: Box::new(ErrorPayload {
                kind,
                class: None,
                message_kind: None,
                description,
                detail,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for ProcessingError {
    fn eq(&self, other: &ProcessingError) -> bool {
        self.kind() == other.kind()
            && self.class() == other.class()
            && self.message_kind() == other.message_kind()
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        let location = payload.location;

        write!(f, "[{:?}/{}] ", payload.kind, self.class())?;
        if let Some(message_kind) = payload.message_kind {
            write!(f, "{message_kind} message: ")?;
        }
        write!(
            f,
            "{} @ {}:{}:{}",
            payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        Ok(())
    }
}

impl error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for ProcessingError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> ProcessingError {
        ProcessingError::from_components(kind, Cow::Borrowed(description), None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for ProcessingError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> ProcessingError {
        ProcessingError::from_components(kind, Cow::Borrowed(description), Some(detail.into()))
    }
}

impl From<std::io::Error> for ProcessingError {
    #[track_caller]
    fn from(err: std::io::Error) -> ProcessingError {
        let detail = err.to_string();
        ProcessingError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

/// Errors detected while building a [`crate::dispatcher::Dispatcher`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one stream must be configured")]
    NoStreams,

    #[error("stream `{0}` is configured more than once")]
    DuplicateKind(MessageKind),

    #[error("stream `{0}` must have a capacity greater than 0")]
    ZeroCapacity(MessageKind),

    #[error("stream `{0}` must have a parallelism greater than 0")]
    ZeroParallelism(MessageKind),

    #[error("no stream is configured for message kind `{0}`")]
    UnknownKind(MessageKind),
}

/// The channel of a `reject_when_full` stream had no free slot.
#[derive(Debug, Error)]
#[error("channel for `{}` is full ({capacity} messages pending)", .message.kind())]
pub struct ChannelFull {
    /// The rejected message.
    pub message: Message,
    pub capacity: usize,
}

/// A message could not be accepted for processing.
///
/// Every variant returns ownership of the message to the caller.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no stream is configured for message kind `{}`", .0.kind())]
    UnknownKind(Message),

    #[error("message rejected: {0}")]
    Rejected(ChannelFull),

    #[error("stream `{}` is not running", .0.kind())]
    NotRunning(Message),
}

impl SubmitError {
    /// Kind of the message that was not accepted.
    pub fn kind(&self) -> MessageKind {
        self.message().kind()
    }

    pub fn message(&self) -> &Message {
        match self {
            SubmitError::UnknownKind(message) | SubmitError::NotRunning(message) => message,
            SubmitError::Rejected(full) => &full.message,
        }
    }

    /// Gives the message back to the caller.
    pub fn into_message(self) -> Message {
        match self {
            SubmitError::UnknownKind(message) | SubmitError::NotRunning(message) => message,
            SubmitError::Rejected(full) => full.message,
        }
    }
}

/// Errors returned by [`crate::dispatcher::Dispatcher::shutdown`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// Some streams were still draining when the timeout elapsed.
    ///
    /// Their workers keep running detached until the remaining messages are handled.
    #[error("streams {} did not drain within {timeout_ms}ms", display_kinds(.kinds))]
    Timeout {
        kinds: Vec<MessageKind>,
        timeout_ms: u128,
    },
}

fn display_kinds(kinds: &[MessageKind]) -> String {
    kinds
        .iter()
        .map(|kind| format!("`{kind}`"))
        .collect::<Vec<_>>()
        .join(", ")
}
