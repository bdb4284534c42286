use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use config::shared::{BackpressurePolicy, MessageKind, StreamConfig};

/// Immutable unit of work routed by the dispatcher.
///
/// The payload is opaque to the core, decoding it is left to the handler registered for the
/// message's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
    received_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self::with_received_at(kind, payload, Utc::now())
    }

    pub fn with_received_at(
        kind: MessageKind,
        payload: impl Into<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            payload: payload.into(),
            received_at,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
