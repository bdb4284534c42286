//! Routing of inbound messages to the stream processor of their kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ShutdownError, SubmitError};
use crate::handler::{BoxedHandler, Handler, box_handler};
use crate::processor::{ProcessorState, StreamProcessor, validate_stream};
use crate::stats::ProcessorStats;
use crate::transport::Subscription;
use crate::types::{Message, MessageKind, StreamConfig};
use crate::workers::reporter::{ErrorReporter, LogReporter};

/// Settings and handler of one stream, as passed to [`Dispatcher::configure`].
pub struct StreamRegistration {
    config: StreamConfig,
    handler: BoxedHandler,
}

impl StreamRegistration {
    pub fn new<H: Handler>(config: StreamConfig, handler: H) -> Self {
        Self {
            config,
            handler: box_handler(handler),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.config.kind
    }
}

impl fmt::Debug for StreamRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistration")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct DispatcherInner {
    processors: BTreeMap<MessageKind, Arc<StreamProcessor>>,
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        // Without an explicit shutdown the workers still drain what was accepted and exit.
        for processor in self.processors.values() {
            if processor.state() == ProcessorState::Running {
                debug!(kind = %processor.kind(), "dispatcher dropped without shutdown, closing stream");
            }
            processor.close();
        }
    }
}

/// Owns one [`StreamProcessor`] per configured message kind.
///
/// The set of streams is fixed at construction. Clones share the same processors, so any
/// number of producers can submit concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Validates the registrations and starts one processor per stream.
    ///
    /// Outcomes of handler invocations are logged through [`LogReporter`]. Must be called from
    /// within a tokio runtime.
    pub fn configure(streams: Vec<StreamRegistration>) -> Result<Self, ConfigError> {
        Self::configure_with_reporter(streams, Arc::new(LogReporter))
    }

    /// Same as [`Dispatcher::configure`] with a custom [`ErrorReporter`] shared by all streams.
    pub fn configure_with_reporter(
        streams: Vec<StreamRegistration>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, ConfigError> {
        if streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        let mut processors = BTreeMap::new();
        for registration in streams {
            validate_stream(&registration.config)?;

            let kind = registration.config.kind;
            if processors.contains_key(&kind) {
                return Err(ConfigError::DuplicateKind(kind));
            }

            let processor =
                StreamProcessor::from_parts(registration.config, registration.handler, reporter.clone());
            processors.insert(kind, Arc::new(processor));
        }

        for processor in processors.values() {
            processor.start();
        }

        info!(
            streams = processors.len(),
            kinds = ?processors.keys().collect::<Vec<_>>(),
            "dispatcher started"
        );

        Ok(Self {
            inner: Arc::new(DispatcherInner { processors }),
        })
    }

    /// Routes a message to the stream of its kind.
    ///
    /// On failure the message is handed back inside the [`SubmitError`].
    pub async fn submit(&self, message: Message) -> Result<(), SubmitError> {
        match self.inner.processors.get(&message.kind()) {
            Some(processor) => processor.submit(message).await,
            None => Err(SubmitError::UnknownKind(message)),
        }
    }

    /// Stops every stream concurrently and waits until all of them drained.
    ///
    /// Streams still draining when `timeout` elapses are listed in [`ShutdownError::Timeout`].
    /// They are not interrupted: their workers finish the remaining messages in the background.
    /// Calling this again after a completed shutdown returns immediately. A timeout too large
    /// to be represented as a deadline waits without limit.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let timeout_ms = timeout.as_millis();
        info!(timeout_ms, "dispatcher shutting down");

        let deadline = Instant::now().checked_add(timeout);
        let mut stops = JoinSet::new();
        for processor in self.inner.processors.values() {
            let processor = processor.clone();
            stops.spawn(async move {
                processor.stop().await;
                processor.kind()
            });
        }

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, stops.join_next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => stops.join_next().await,
            };

            match next {
                Some(Ok(kind)) => debug!(%kind, "stream drained"),
                Some(Err(join_err)) => error!(error = %join_err, "stream stop task failed"),
                None => break,
            }
        }

        let kinds: Vec<MessageKind> = self
            .inner
            .processors
            .values()
            .filter(|processor| processor.state() != ProcessorState::Stopped)
            .map(|processor| processor.kind())
            .collect();

        if kinds.is_empty() {
            info!("dispatcher shut down");
            return Ok(());
        }

        warn!(?kinds, timeout_ms, "streams did not drain before the shutdown timeout");

        Err(ShutdownError::Timeout { kinds, timeout_ms })
    }

    /// Returns a transport-facing handle delivering raw messages of `kind`.
    pub fn subscribe(&self, kind: MessageKind) -> Result<Subscription, ConfigError> {
        if !self.inner.processors.contains_key(&kind) {
            return Err(ConfigError::UnknownKind(kind));
        }

        Ok(Subscription::new(kind, self.clone()))
    }

    /// Configured message kinds in ascending order.
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.inner.processors.keys().copied().collect()
    }

    pub fn state(&self, kind: MessageKind) -> Option<ProcessorState> {
        self.inner.processors.get(&kind).map(|processor| processor.state())
    }

    /// Snapshot of every stream, ordered by kind.
    pub fn stats(&self) -> Vec<ProcessorStats> {
        self.inner
            .processors
            .values()
            .map(|processor| processor.stats())
            .collect()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("processors", &self.inner.processors)
            .finish()
    }
}
