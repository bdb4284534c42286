use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use dispatch::concurrency::shutdown::create_shutdown_channel;
use dispatch::dispatcher::{Dispatcher, StreamRegistration};
use dispatch::error::{ConfigError, SubmitError};
use dispatch::test_utils::handler::{HandlerGate, RecordingHandler};
use dispatch::transport::{AckDecision, ConsumerSummary, Delivery, QueueConsumer, run_consumer};
use dispatch::types::{BackpressurePolicy, MessageKind, StreamConfig};
use telemetry::tracing::init_test_tracing;

/// Consumer replaying a fixed list of deliveries, then either ending or idling forever.
#[derive(Debug, Default)]
struct ScriptedConsumer {
    pending: VecDeque<Delivery>,
    settled: Vec<(u64, AckDecision)>,
    idle_when_empty: bool,
}

impl ScriptedConsumer {
    fn new(deliveries: impl IntoIterator<Item = (MessageKind, &'static str)>) -> Self {
        let pending = deliveries
            .into_iter()
            .enumerate()
            .map(|(tag, (kind, body))| Delivery {
                tag: tag as u64,
                kind,
                body: Bytes::from_static(body.as_bytes()),
            })
            .collect();

        Self {
            pending,
            ..Default::default()
        }
    }

    fn idle_when_empty(mut self) -> Self {
        self.idle_when_empty = true;
        self
    }
}

impl QueueConsumer for &mut ScriptedConsumer {
    type Error = Infallible;

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, Self::Error> {
        match self.pending.pop_front() {
            Some(delivery) => Ok(Some(delivery)),
            None if self.idle_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn settle(&mut self, delivery: Delivery, decision: AckDecision) -> Result<(), Self::Error> {
        self.settled.push((delivery.tag, decision));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_wraps_raw_bytes_into_messages() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Payload, 4, 1),
        handler.clone(),
    )])
    .unwrap();

    let subscription = dispatcher.subscribe(MessageKind::Payload).unwrap();
    assert_eq!(subscription.kind(), MessageKind::Payload);

    let outcome = subscription
        .on_message_received(Bytes::from_static(b"raw"))
        .await;
    assert!(outcome.is_accepted());
    assert_eq!(outcome.ack, AckDecision::Ack);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();

    let handled = handler.handled();
    assert_eq!(handled.len(), 1);
    assert_eq!(handled[0].kind(), MessageKind::Payload);
    assert_eq!(handled[0].payload().as_ref(), b"raw");

    let outcome = subscription
        .on_message_received(Bytes::from_static(b"late"))
        .await;
    assert!(matches!(outcome.result, Err(SubmitError::NotRunning(_))));
    assert_eq!(outcome.ack, AckDecision::Nack { requeue: true });
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_to_an_unconfigured_kind_fails() {
    init_test_tracing();

    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 4, 1),
        RecordingHandler::new(),
    )])
    .unwrap();

    let err = dispatcher.subscribe(MessageKind::Payload).unwrap_err();
    assert_eq!(err, ConfigError::UnknownKind(MessageKind::Payload));

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn consumer_settles_every_delivery_until_exhausted() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let handler = RecordingHandler::new().with_gate(&gate);
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 1, 1)
            .with_backpressure(BackpressurePolicy::RejectWhenFull),
        handler.clone(),
    )])
    .unwrap();

    let mut consumer = ScriptedConsumer::new([
        (MessageKind::Header, "accepted"),
        (MessageKind::Header, "full"),
        (MessageKind::Payload, "unrouted"),
    ]);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let summary = run_consumer(&mut consumer, &dispatcher, shutdown_rx)
        .await
        .unwrap();

    assert_eq!(
        summary,
        ConsumerSummary {
            acked: 1,
            requeued: 1,
            dropped: 1,
        }
    );
    assert_eq!(
        consumer.settled,
        vec![
            (0, AckDecision::Ack),
            (1, AckDecision::Nack { requeue: true }),
            (2, AckDecision::Nack { requeue: false }),
        ]
    );

    gate.open();
    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handler.handled_payloads(), vec![Bytes::from("accepted")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn consumer_stops_on_shutdown_signal() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Payload, 4, 2),
        handler.clone(),
    )])
    .unwrap();

    let finished = handler.wait_for_finished(2);
    let mut consumer = ScriptedConsumer::new([
        (MessageKind::Payload, "one"),
        (MessageKind::Payload, "two"),
    ])
    .idle_when_empty();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let consumer_dispatcher = dispatcher.clone();
    let consumer_task = tokio::spawn(async move {
        let summary = run_consumer(&mut consumer, &consumer_dispatcher, shutdown_rx).await;
        (summary, consumer.settled)
    });

    finished.notified().await;
    shutdown_tx.shutdown();

    let (summary, settled) = tokio::time::timeout(Duration::from_secs(5), consumer_task)
        .await
        .expect("consumer should stop once shutdown is signaled")
        .unwrap();

    assert_eq!(summary.unwrap().acked, 2);
    assert_eq!(settled.len(), 2);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}
