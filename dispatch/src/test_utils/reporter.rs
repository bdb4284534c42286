use std::sync::{Arc, Mutex};

use crate::error::ProcessingError;
use crate::test_utils::notify::{CountWaiters, TimedNotify};
use crate::types::MessageKind;
use crate::workers::reporter::{ErrorReporter, ProcessingReport};

#[derive(Debug, Default)]
struct Inner {
    outcomes: Vec<(MessageKind, Result<(), ProcessingError>)>,
    waiters: CountWaiters,
}

/// Reporter keeping every outcome for later assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<(MessageKind, Result<(), ProcessingError>)> {
        self.inner.lock().unwrap().outcomes.clone()
    }

    pub fn errors(&self) -> Vec<ProcessingError> {
        self.outcomes()
            .into_iter()
            .filter_map(|(_, outcome)| outcome.err())
            .collect()
    }

    /// Returns a notification fired once `count` outcomes have been reported.
    pub fn wait_for_reports(&self, count: usize) -> TimedNotify {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.outcomes.len();
        inner.waiters.register(count, current)
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ProcessingReport) {
        let mut inner = self.inner.lock().unwrap();
        inner.outcomes.push((report.kind, report.outcome.clone()));
        let current = inner.outcomes.len();
        inner.waiters.update(current);
    }
}
