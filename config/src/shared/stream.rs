use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Kind of an inbound message, one per independent stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Transaction header carrying series metadata.
    Header,
    /// Series payload carrying a data stream.
    Payload,
}

impl MessageKind {
    /// Every known message kind.
    pub const ALL: [MessageKind; 2] = [MessageKind::Header, MessageKind::Payload];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Header => "header",
            MessageKind::Payload => "payload",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "header" => Ok(MessageKind::Header),
            "payload" => Ok(MessageKind::Payload),
            other => Err(format!("unknown message kind `{other}`")),
        }
    }
}

/// What a producer experiences when a stream's channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// The producer waits until a slot frees up.
    #[default]
    Block,
    /// The producer gets the message back immediately.
    RejectWhenFull,
}

impl BackpressurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpressurePolicy::Block => "block",
            BackpressurePolicy::RejectWhenFull => "reject_when_full",
        }
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of a single stream processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Message kind routed to this stream.
    pub kind: MessageKind,
    /// Maximum number of accepted messages that have not finished processing.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Number of workers draining the stream concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Behavior of `submit` when the stream is at capacity.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
}

impl StreamConfig {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub const DEFAULT_PARALLELISM: usize = 4;

    /// Creates a stream config with the given sizing and [`BackpressurePolicy::Block`].
    pub fn new(kind: MessageKind, capacity: usize, parallelism: usize) -> Self {
        Self {
            kind,
            capacity,
            parallelism,
            backpressure: BackpressurePolicy::Block,
        }
    }

    pub fn with_backpressure(mut self, backpressure: BackpressurePolicy) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Ensures capacity and parallelism are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("streams.{}.capacity", self.kind),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.parallelism == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("streams.{}.parallelism", self.kind),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_capacity() -> usize {
    StreamConfig::DEFAULT_CAPACITY
}

fn default_parallelism() -> usize {
    StreamConfig::DEFAULT_PARALLELISM
}
