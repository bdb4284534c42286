use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::concurrency::channel::BoundedChannel;
use crate::error::{ErrorKind, ProcessingError};
use crate::handler::{BoxedHandler, Handler, box_handler};
use crate::metrics::{
    CLASS_LABEL, DISPATCH_HANDLER_DURATION_MILLISECONDS_TOTAL, DISPATCH_HANDLER_PANICS_TOTAL,
    DISPATCH_MESSAGES_FAILED_TOTAL, DISPATCH_MESSAGES_PROCESSED_TOTAL, DISPATCH_QUEUE_DEPTH,
    ERROR_KIND_LABEL, KIND_LABEL, register_metrics,
};
use crate::processing_error;
use crate::stats::StreamCounters;
use crate::types::{Message, MessageKind};
use crate::workers::reporter::{ErrorReporter, ProcessingReport};

/// Everything a worker needs, shared by all workers of one pool.
pub(crate) struct WorkerContext {
    pub(crate) kind: MessageKind,
    pub(crate) channel: BoundedChannel<Message>,
    pub(crate) handler: BoxedHandler,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) counters: Arc<StreamCounters>,
}

impl WorkerContext {
    /// Updates counters and metrics for a finished invocation and hands it to the reporter.
    fn complete(&self, report: ProcessingReport, panicked: bool) {
        let kind = self.kind.as_str();

        counter!(DISPATCH_HANDLER_DURATION_MILLISECONDS_TOTAL, KIND_LABEL => kind)
            .increment(report.elapsed.as_millis() as u64);

        match &report.outcome {
            Ok(()) => {
                self.counters.record_success();
                counter!(DISPATCH_MESSAGES_PROCESSED_TOTAL, KIND_LABEL => kind).increment(1);
            }
            Err(err) => {
                self.counters.record_failure(err.class());
                counter!(
                    DISPATCH_MESSAGES_FAILED_TOTAL,
                    KIND_LABEL => kind,
                    CLASS_LABEL => err.class().as_str(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind())
                )
                .increment(1);
            }
        }

        if panicked {
            self.counters.record_panic();
            counter!(DISPATCH_HANDLER_PANICS_TOTAL, KIND_LABEL => kind).increment(1);
        }

        // A misbehaving reporter must not take the worker down with it.
        let reported = std::panic::catch_unwind(AssertUnwindSafe(|| self.reporter.report(&report)));
        if reported.is_err() {
            error!(kind = %self.kind, worker_id = report.worker_id, "error reporter panicked");
        }
    }
}

/// Fixed-size set of workers draining one channel.
///
/// Each worker takes messages in FIFO order, runs the handler, reports the outcome and moves
/// on. Handler errors and panics are confined to the message that caused them.
#[derive(Debug)]
pub struct WorkerPool {
    kind: MessageKind,
    channel: BoundedChannel<Message>,
    workers: JoinSet<usize>,
}

impl WorkerPool {
    /// Spawns `parallelism` workers draining `channel` with `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<H: Handler>(
        kind: MessageKind,
        channel: BoundedChannel<Message>,
        handler: H,
        parallelism: usize,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let context = WorkerContext {
            kind,
            channel,
            handler: box_handler(handler),
            reporter,
            counters: Arc::new(StreamCounters::default()),
        };

        Self::spawn(context, parallelism)
    }

    pub(crate) fn spawn(context: WorkerContext, parallelism: usize) -> Self {
        register_metrics();

        let kind = context.kind;
        let channel = context.channel.clone();
        let context = Arc::new(context);

        let mut workers = JoinSet::new();
        for worker_id in 0..parallelism {
            workers.spawn(run_worker(context.clone(), worker_id));
        }

        info!(%kind, parallelism, "worker pool started");

        Self {
            kind,
            channel,
            workers,
        }
    }

    /// Number of workers that have not exited yet.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Closes the channel and waits until every worker drained it and exited.
    ///
    /// Messages still queued are processed before the workers exit.
    pub async fn drain_and_stop(mut self) {
        self.channel.close();

        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(worker_id) => debug!(kind = %self.kind, worker_id, "worker exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    debug!(kind = %self.kind, "worker task was cancelled");
                }
                Err(join_err) => {
                    let err = processing_error!(
                        ErrorKind::WorkerPanic,
                        "Worker task panicked",
                        join_err
                    )
                    .with_message_kind(self.kind);
                    error!(kind = %self.kind, error = %err, "worker exited abnormally");
                }
            }
        }

        info!(kind = %self.kind, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    /// Closes the channel and detaches the workers, they drain it in the background.
    ///
    /// Workers are never aborted, not even when a `drain_and_stop` future is dropped midway.
    fn drop(&mut self) {
        self.channel.close();

        if !self.workers.is_empty() {
            debug!(kind = %self.kind, workers = self.workers.len(), "worker pool detached");
            self.workers.detach_all();
        }
    }
}

async fn run_worker(context: Arc<WorkerContext>, worker_id: usize) -> usize {
    let kind = context.kind;
    debug!(%kind, worker_id, "worker started");

    while let Some((message, slot)) = context.channel.recv().await {
        gauge!(DISPATCH_QUEUE_DEPTH, KIND_LABEL => kind.as_str()).set(context.channel.len() as f64);

        let received_at = message.received_at();
        let started = Instant::now();

        let result = AssertUnwindSafe(context.handler.handle_boxed(message))
            .catch_unwind()
            .await;

        let (outcome, panicked) = match result {
            Ok(Ok(())) => (Ok(()), false),
            Ok(Err(err)) => (Err(err.with_message_kind(kind)), false),
            Err(panic) => {
                let err = handler_panic_error(&*panic).with_message_kind(kind);
                error!(%kind, worker_id, error = %err, "handler panicked");
                (Err(err), true)
            }
        };

        context.complete(
            ProcessingReport {
                kind,
                worker_id,
                received_at,
                elapsed: started.elapsed(),
                outcome,
            },
            panicked,
        );

        // Capacity is only given back once the outcome has been recorded.
        drop(slot);
    }

    debug!(%kind, worker_id, "worker stopping, channel closed and drained");

    worker_id
}

fn handler_panic_error(panic: &(dyn Any + Send)) -> ProcessingError {
    let detail = if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload is not a string".to_owned()
    };

    processing_error!(ErrorKind::HandlerPanic, "Handler panicked", detail = detail)
}
