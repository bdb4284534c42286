use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dispatch::dispatcher::{Dispatcher, StreamRegistration};
use dispatch::error::SubmitError;
use dispatch::processor::ProcessorState;
use dispatch::test_utils::handler::{HandlerGate, RecordingHandler};
use dispatch::test_utils::reporter::RecordingReporter;
use dispatch::types::{BackpressurePolicy, Message, MessageKind, StreamConfig};
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_streams_drain_every_accepted_message_on_shutdown() {
    init_test_tracing();

    let headers = RecordingHandler::new().with_delay(Duration::from_millis(5));
    let payloads = RecordingHandler::new().with_delay(Duration::from_millis(5));
    let reporter = RecordingReporter::new();
    let dispatcher = Dispatcher::configure_with_reporter(
        vec![
            StreamRegistration::new(StreamConfig::new(MessageKind::Header, 10, 2), headers.clone()),
            StreamRegistration::new(
                StreamConfig::new(MessageKind::Payload, 10, 4),
                payloads.clone(),
            ),
        ],
        Arc::new(reporter.clone()),
    )
    .unwrap();

    for i in 0..5 {
        dispatcher
            .submit(Message::new(MessageKind::Header, Bytes::from(format!("h{i}"))))
            .await
            .unwrap();
    }
    for i in 0..20 {
        dispatcher
            .submit(Message::new(MessageKind::Payload, Bytes::from(format!("p{i}"))))
            .await
            .unwrap();
    }

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(headers.handled().len(), 5);
    assert_eq!(payloads.handled().len(), 20);
    assert_eq!(reporter.outcomes().len(), 25);
    assert!(reporter.errors().is_empty());
    assert!(headers.max_in_flight() <= 2);
    assert!(payloads.max_in_flight() <= 4);

    for kind in MessageKind::ALL {
        assert_eq!(dispatcher.state(kind), Some(ProcessorState::Stopped));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_stream_rejects_instead_of_blocking() {
    init_test_tracing();

    let handler = RecordingHandler::new().with_delay(Duration::from_secs(1));
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 1, 1)
            .with_backpressure(BackpressurePolicy::RejectWhenFull),
        handler.clone(),
    )])
    .unwrap();

    dispatcher
        .submit(Message::new(MessageKind::Header, Bytes::from("first")))
        .await
        .unwrap();

    let err = dispatcher
        .submit(Message::new(MessageKind::Header, Bytes::from("second")))
        .await
        .unwrap_err();

    let SubmitError::Rejected(full) = err else {
        panic!("expected a full channel rejection, got {err:?}");
    };
    assert_eq!(full.capacity, 1);
    assert_eq!(full.message.payload().as_ref(), b"second");

    let stats = &dispatcher.stats()[0];
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.rejected, 1);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handler.handled_payloads(), vec![Bytes::from("first")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_caps_concurrent_handler_invocations() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let handler = RecordingHandler::new().with_gate(&gate);
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Payload, 20, 3),
        handler.clone(),
    )])
    .unwrap();

    for i in 0..12 {
        dispatcher
            .submit(Message::new(MessageKind::Payload, Bytes::from(format!("{i}"))))
            .await
            .unwrap();
    }

    // Give idle workers the chance to pick up more than they are allowed to.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.handled().len(), 3);

    let stats = &dispatcher.stats()[0];
    assert_eq!(stats.in_flight, 3);
    assert_eq!(stats.queued, 9);

    gate.open();
    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(handler.handled().len(), 12);
    assert_eq!(handler.max_in_flight(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn capacity_counts_messages_being_processed() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let handler = RecordingHandler::new().with_gate(&gate);
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 2, 1)
            .with_backpressure(BackpressurePolicy::RejectWhenFull),
        handler.clone(),
    )])
    .unwrap();

    for body in ["a", "b"] {
        dispatcher
            .submit(Message::new(MessageKind::Header, Bytes::from(body)))
            .await
            .unwrap();
    }

    // One message is held by the worker, one is queued: the stream is full.
    let err = dispatcher
        .submit(Message::new(MessageKind::Header, Bytes::from("c")))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Rejected(_)));

    gate.open();
    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        handler.handled_payloads(),
        vec![Bytes::from("a"), Bytes::from("b")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_kind_is_rejected_with_the_message() {
    init_test_tracing();

    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 4, 1),
        RecordingHandler::new(),
    )])
    .unwrap();

    let err = dispatcher
        .submit(Message::new(MessageKind::Payload, Bytes::from("orphan")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), MessageKind::Payload);
    assert!(matches!(err, SubmitError::UnknownKind(_)));
    assert_eq!(dispatcher.stats()[0].submitted, 0);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}
