//! Seam between inbound transports and the dispatcher.
//!
//! A transport obtains a [`Subscription`] per message kind and hands it every raw delivery.
//! The returned [`DispatchOutcome`] carries the submit result and the [`AckDecision`] the
//! transport should apply to the delivery. [`run_consumer`] drives any [`QueueConsumer`]
//! through this loop until the source is exhausted or shutdown is signaled.

use std::collections::HashMap;
use std::error;
use std::fmt;
use std::future::Future;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::dispatcher::Dispatcher;
use crate::error::SubmitError;
use crate::types::{Message, MessageKind};

/// What the transport should do with a delivery once the dispatcher answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// The message was accepted, remove it from the source.
    Ack,
    /// The message was not accepted. With `requeue` set it may be delivered again later.
    Nack { requeue: bool },
}

impl AckDecision {
    /// Derives the decision for a submit result.
    ///
    /// Full channels and stopped streams are temporary conditions and requeue the delivery,
    /// a kind without a stream never will be accepted and is dropped.
    pub fn for_result(result: &Result<(), SubmitError>) -> Self {
        match result {
            Ok(()) => AckDecision::Ack,
            Err(SubmitError::Rejected(_)) | Err(SubmitError::NotRunning(_)) => {
                AckDecision::Nack { requeue: true }
            }
            Err(SubmitError::UnknownKind(_)) => AckDecision::Nack { requeue: false },
        }
    }
}

/// Result of handing one raw delivery to the dispatcher.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub result: Result<(), SubmitError>,
    pub ack: AckDecision,
}

impl DispatchOutcome {
    fn new(result: Result<(), SubmitError>) -> Self {
        let ack = AckDecision::for_result(&result);
        Self { result, ack }
    }

    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Handle through which a transport delivers raw messages of one kind.
#[derive(Clone)]
pub struct Subscription {
    kind: MessageKind,
    dispatcher: Dispatcher,
}

impl Subscription {
    pub(crate) fn new(kind: MessageKind, dispatcher: Dispatcher) -> Self {
        Self { kind, dispatcher }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Wraps the raw bytes into a [`Message`] and submits it.
    pub async fn on_message_received(&self, body: Bytes) -> DispatchOutcome {
        let message = Message::new(self.kind, body);
        DispatchOutcome::new(self.dispatcher.submit(message).await)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Raw message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier used to settle the delivery with the source.
    pub tag: u64,
    pub kind: MessageKind,
    pub body: Bytes,
}

/// Source of raw deliveries, such as a message queue client.
pub trait QueueConsumer: Send {
    type Error: error::Error + Send + Sync + 'static;

    /// Waits for the next delivery, [`None`] once the source is exhausted.
    ///
    /// Must be cancel safe: it is raced against the shutdown signal.
    fn next_delivery(&mut self) -> impl Future<Output = Result<Option<Delivery>, Self::Error>> + Send;

    /// Applies the ack decision to a delivery previously returned by
    /// [`QueueConsumer::next_delivery`].
    fn settle(
        &mut self,
        delivery: Delivery,
        decision: AckDecision,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Counts of deliveries settled by [`run_consumer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
}

/// Feeds deliveries from `consumer` into the dispatcher until the source is exhausted or
/// shutdown is signaled.
///
/// Deliveries of kinds without a stream are nacked without requeue.
pub async fn run_consumer<C>(
    mut consumer: C,
    dispatcher: &Dispatcher,
    mut shutdown_rx: ShutdownRx,
) -> Result<ConsumerSummary, C::Error>
where
    C: QueueConsumer,
{
    let subscriptions: HashMap<MessageKind, Subscription> = dispatcher
        .kinds()
        .into_iter()
        .filter_map(|kind| dispatcher.subscribe(kind).ok().map(|sub| (kind, sub)))
        .collect();

    let mut summary = ConsumerSummary::default();

    loop {
        let delivery = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("shutdown signal received, consumer stopping");
                break;
            }
            delivery = consumer.next_delivery() => delivery?,
        };

        let Some(delivery) = delivery else {
            info!("consumer source exhausted");
            break;
        };

        let outcome = match subscriptions.get(&delivery.kind) {
            Some(subscription) => subscription.on_message_received(delivery.body.clone()).await,
            None => DispatchOutcome::new(Err(SubmitError::UnknownKind(Message::new(
                delivery.kind,
                delivery.body.clone(),
            )))),
        };

        if let Err(err) = &outcome.result {
            debug!(tag = delivery.tag, kind = %delivery.kind, error = %err, "delivery not accepted");
        }

        match outcome.ack {
            AckDecision::Ack => summary.acked += 1,
            AckDecision::Nack { requeue: true } => summary.requeued += 1,
            AckDecision::Nack { requeue: false } => {
                warn!(tag = delivery.tag, kind = %delivery.kind, "dropping delivery without a stream");
                summary.dropped += 1;
            }
        }

        consumer.settle(delivery, outcome.ack).await?;
    }

    Ok(summary)
}
