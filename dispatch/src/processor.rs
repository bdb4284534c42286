//! A single stream: one bounded channel, one worker pool and one handler.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{counter, gauge};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::concurrency::channel::{BoundedChannel, EnqueueError};
use crate::error::{ChannelFull, ConfigError, SubmitError};
use crate::handler::{BoxedHandler, Handler, box_handler};
use crate::metrics::{
    DISPATCH_MESSAGES_REJECTED_TOTAL, DISPATCH_MESSAGES_SUBMITTED_TOTAL, DISPATCH_QUEUE_DEPTH,
    KIND_LABEL,
};
use crate::stats::{ProcessorStats, StreamCounters, StreamShape};
use crate::types::{Message, MessageKind, StreamConfig};
use crate::workers::pool::{WorkerContext, WorkerPool};
use crate::workers::reporter::ErrorReporter;

/// Lifecycle of a [`StreamProcessor`].
///
/// States only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Created,
    /// Accepting and processing messages.
    Running,
    /// Not accepting messages, workers finish what was accepted.
    Draining,
    /// Every worker exited.
    Stopped,
}

impl ProcessorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Created => "created",
            ProcessorState::Running => "running",
            ProcessorState::Draining => "draining",
            ProcessorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing pipeline of one message kind.
pub struct StreamProcessor {
    config: StreamConfig,
    channel: BoundedChannel<Message>,
    handler: BoxedHandler,
    reporter: Arc<dyn ErrorReporter>,
    counters: Arc<StreamCounters>,
    state_tx: Arc<watch::Sender<ProcessorState>>,
    pool: Mutex<Option<WorkerPool>>,
}

impl StreamProcessor {
    /// Creates a processor in [`ProcessorState::Created`]. Nothing is spawned until
    /// [`StreamProcessor::start`].
    pub fn new<H: Handler>(
        config: StreamConfig,
        handler: H,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, ConfigError> {
        validate_stream(&config)?;

        Ok(Self::from_parts(config, box_handler(handler), reporter))
    }

    pub(crate) fn from_parts(
        config: StreamConfig,
        handler: BoxedHandler,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ProcessorState::Created);

        Self {
            channel: BoundedChannel::new(config.capacity, config.backpressure),
            config,
            handler,
            reporter,
            counters: Arc::new(StreamCounters::default()),
            state_tx: Arc::new(state_tx),
            pool: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.config.kind
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        *self.state_tx.borrow()
    }

    /// Watches state transitions of this processor.
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state_tx.subscribe()
    }

    /// Moves the processor from Created to Running and spawns its workers.
    ///
    /// Returns `false` without side effects when the processor was already started. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> bool {
        // Held across the transition so a concurrent `stop` finds the pool once it sees Running.
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);

        let started = self.state_tx.send_if_modified(|state| {
            if *state == ProcessorState::Created {
                *state = ProcessorState::Running;
                true
            } else {
                false
            }
        });

        if !started {
            return false;
        }

        let context = WorkerContext {
            kind: self.config.kind,
            channel: self.channel.clone(),
            handler: self.handler.clone(),
            reporter: self.reporter.clone(),
            counters: self.counters.clone(),
        };
        *pool = Some(WorkerPool::spawn(context, self.config.parallelism));
        drop(pool);

        info!(
            kind = %self.config.kind,
            capacity = self.config.capacity,
            parallelism = self.config.parallelism,
            backpressure = %self.config.backpressure,
            state = %ProcessorState::Running,
            "stream processor started"
        );

        true
    }

    /// Enqueues a message for processing.
    ///
    /// Fails with [`SubmitError::NotRunning`] outside of the Running state without waiting.
    /// When the channel is full the caller waits for a free slot or gets
    /// [`SubmitError::Rejected`], depending on the stream's backpressure policy.
    pub async fn submit(&self, message: Message) -> Result<(), SubmitError> {
        if self.state() != ProcessorState::Running {
            return Err(SubmitError::NotRunning(message));
        }

        let kind = self.config.kind.as_str();

        match self.channel.send(message).await {
            Ok(()) => {
                self.counters.record_submitted();
                counter!(DISPATCH_MESSAGES_SUBMITTED_TOTAL, KIND_LABEL => kind).increment(1);
                gauge!(DISPATCH_QUEUE_DEPTH, KIND_LABEL => kind).set(self.channel.len() as f64);

                Ok(())
            }
            Err(EnqueueError::Full(message)) => {
                self.counters.record_rejected();
                counter!(DISPATCH_MESSAGES_REJECTED_TOTAL, KIND_LABEL => kind).increment(1);

                Err(SubmitError::Rejected(ChannelFull {
                    message,
                    capacity: self.config.capacity,
                }))
            }
            Err(EnqueueError::Closed(message)) => Err(SubmitError::NotRunning(message)),
        }
    }

    /// Stops accepting messages and waits until every accepted message was handled.
    ///
    /// Idempotent: concurrent and repeated calls all return once the processor is Stopped.
    /// A processor that was never started only has its channel closed and stays Created.
    /// The drain runs in its own task, dropping this future does not interrupt it.
    pub async fn stop(&self) {
        loop {
            let draining = self.state_tx.send_if_modified(|state| {
                if *state == ProcessorState::Running {
                    *state = ProcessorState::Draining;
                    // Closed under the state lock, no submit can enqueue once Draining is visible.
                    self.channel.close();
                    true
                } else {
                    false
                }
            });

            if draining {
                self.spawn_drain();
                break;
            }

            match self.state() {
                ProcessorState::Created => {
                    warn!(kind = %self.config.kind, "stopping a stream processor that was never started");
                    self.channel.close();
                    return;
                }
                // Started concurrently, retry the transition.
                ProcessorState::Running => continue,
                ProcessorState::Draining | ProcessorState::Stopped => break,
            }
        }

        let mut state_rx = self.state_tx.subscribe();
        // The sender lives in `self`, so waiting cannot fail while we borrow it.
        let _ = state_rx
            .wait_for(|state| *state == ProcessorState::Stopped)
            .await;
    }

    fn spawn_drain(&self) {
        let kind = self.config.kind;
        info!(
            %kind,
            state = %ProcessorState::Draining,
            queued = self.channel.len(),
            "stream processor draining"
        );

        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let state_tx = self.state_tx.clone();

        tokio::spawn(async move {
            if let Some(pool) = pool {
                pool.drain_and_stop().await;
            }

            state_tx.send_replace(ProcessorState::Stopped);
            info!(
                %kind,
                state = %ProcessorState::Stopped,
                "stream processor stopped"
            );
        });
    }

    /// Closes the channel without waiting, workers drain it and exit on their own.
    pub(crate) fn close(&self) {
        self.channel.close();
    }

    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot(StreamShape {
            kind: self.config.kind,
            state: self.state(),
            capacity: self.config.capacity,
            parallelism: self.config.parallelism,
            backpressure: self.config.backpressure,
            queued: self.channel.len(),
            in_flight: self.channel.in_flight(),
        })
    }
}

/// Rejects stream settings a processor cannot run with.
pub(crate) fn validate_stream(config: &StreamConfig) -> Result<(), ConfigError> {
    if config.capacity == 0 {
        return Err(ConfigError::ZeroCapacity(config.kind));
    }

    if config.parallelism == 0 {
        return Err(ConfigError::ZeroParallelism(config.kind));
    }

    Ok(())
}

impl fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        // A pool that was never drained detaches its workers when dropped right after this.
        self.channel.close();
    }
}
