use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{StreamConfig, ValidationError};

/// Settings of the dispatcher: one entry per stream plus the shutdown budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Streams to run, at most one per message kind.
    pub streams: Vec<StreamConfig>,
    /// How long shutdown waits for all streams to drain, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl DispatcherConfig {
    pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validates every stream and rejects empty or duplicated stream lists.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.streams.is_empty() {
            return Err(ValidationError::NoStreams);
        }

        let mut seen = HashSet::with_capacity(self.streams.len());
        for stream in &self.streams {
            stream.validate()?;
            if !seen.insert(stream.kind) {
                return Err(ValidationError::DuplicateStream(stream.kind));
            }
        }

        Ok(())
    }
}

fn default_shutdown_timeout_ms() -> u64 {
    DispatcherConfig::DEFAULT_SHUTDOWN_TIMEOUT_MS
}
