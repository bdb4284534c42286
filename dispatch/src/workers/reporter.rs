use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::error::{ErrorClass, ProcessingError};
use crate::types::MessageKind;

/// Result of one handler invocation as seen by the worker that ran it.
#[derive(Debug)]
pub struct ProcessingReport {
    pub kind: MessageKind,
    pub worker_id: usize,
    /// When the message entered the system.
    pub received_at: DateTime<Utc>,
    /// Time spent inside the handler.
    pub elapsed: Duration,
    pub outcome: Result<(), ProcessingError>,
}

impl ProcessingReport {
    pub fn error(&self) -> Option<&ProcessingError> {
        self.outcome.as_ref().err()
    }
}

/// Receives the outcome of every handler invocation.
///
/// Reporters are called from worker tasks and must not block.
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, report: &ProcessingReport);
}

/// Default reporter writing every outcome to the log.
///
/// Successes are logged at debug level, transient failures as warnings and permanent failures
/// as errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, report: &ProcessingReport) {
        let elapsed_ms = report.elapsed.as_millis() as u64;

        match &report.outcome {
            Ok(()) => debug!(
                kind = %report.kind,
                worker_id = report.worker_id,
                elapsed_ms,
                "message processed"
            ),
            Err(err) if err.class() == ErrorClass::Transient => warn!(
                kind = %report.kind,
                worker_id = report.worker_id,
                error_kind = ?err.kind(),
                received_at = %report.received_at,
                error = %err,
                "message processing failed with a transient error"
            ),
            Err(err) => error!(
                kind = %report.kind,
                worker_id = report.worker_id,
                error_kind = ?err.kind(),
                received_at = %report.received_at,
                error = %err,
                "message processing failed with a permanent error"
            ),
        }
    }
}
