use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorClass;
use crate::processor::ProcessorState;
use crate::types::{BackpressurePolicy, MessageKind};

/// Live counters of one stream, updated by producers and workers.
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed_transient: AtomicU64,
    failed_permanent: AtomicU64,
    panicked: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, class: ErrorClass) {
        match class {
            ErrorClass::Transient => self.failed_transient.fetch_add(1, Ordering::Relaxed),
            ErrorClass::Permanent => self.failed_permanent.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a stream processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorStats {
    pub kind: MessageKind,
    pub state: ProcessorState,
    pub capacity: usize,
    pub parallelism: usize,
    pub backpressure: BackpressurePolicy,
    /// Messages waiting in the channel.
    pub queued: usize,
    /// Messages currently inside a handler.
    pub in_flight: usize,
    pub submitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed_transient: u64,
    /// Permanent failures, panics included.
    pub failed_permanent: u64,
    pub panicked: u64,
}

impl ProcessorStats {
    /// Handler invocations that finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed_transient + self.failed_permanent
    }

    pub fn failed(&self) -> u64 {
        self.failed_transient + self.failed_permanent
    }
}

/// Fields of [`ProcessorStats`] owned by the processor rather than the counters.
pub(crate) struct StreamShape {
    pub(crate) kind: MessageKind,
    pub(crate) state: ProcessorState,
    pub(crate) capacity: usize,
    pub(crate) parallelism: usize,
    pub(crate) backpressure: BackpressurePolicy,
    pub(crate) queued: usize,
    pub(crate) in_flight: usize,
}

impl StreamCounters {
    pub(crate) fn snapshot(&self, shape: StreamShape) -> ProcessorStats {
        ProcessorStats {
            kind: shape.kind,
            state: shape.state,
            capacity: shape.capacity,
            parallelism: shape.parallelism,
            backpressure: shape.backpressure,
            queued: shape.queued,
            in_flight: shape.in_flight,
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed_transient: self.failed_transient.load(Ordering::Relaxed),
            failed_permanent: self.failed_permanent.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}
