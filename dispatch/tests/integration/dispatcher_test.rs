use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dispatch::dispatcher::{Dispatcher, StreamRegistration};
use dispatch::error::{ErrorClass, ErrorKind, ShutdownError, SubmitError};
use dispatch::processor::ProcessorState;
use dispatch::test_utils::handler::{HandlerGate, RecordingHandler};
use dispatch::test_utils::reporter::RecordingReporter;
use dispatch::types::{BackpressurePolicy, Message, MessageKind, StreamConfig};
use telemetry::tracing::init_test_tracing;
use tokio::time::Instant;

fn message(kind: MessageKind, body: impl Into<Bytes>) -> Message {
    Message::new(kind, body.into())
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_processes_messages_in_submission_order() {
    init_test_tracing();

    let handler = RecordingHandler::new();
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Payload, 100, 1),
        handler.clone(),
    )])
    .unwrap();

    let finished = handler.wait_for_finished(50);
    for i in 0..50 {
        dispatcher
            .submit(message(MessageKind::Payload, format!("{i}")))
            .await
            .unwrap();
    }
    finished.notified().await;

    let expected: Vec<Bytes> = (0..50).map(|i| Bytes::from(format!("{i}"))).collect();
    assert_eq!(handler.handled_payloads(), expected);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_deliver_every_message_exactly_once() {
    init_test_tracing();

    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 250;

    let handler = RecordingHandler::new();
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 16, 4),
        handler.clone(),
    )])
    .unwrap();

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let dispatcher = dispatcher.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                dispatcher
                    .submit(message(MessageKind::Header, format!("{producer}-{i}")))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    dispatcher.shutdown(Duration::from_secs(10)).await.unwrap();

    let mut handled: Vec<Bytes> = handler.handled_payloads();
    handled.sort();
    let mut expected: Vec<Bytes> = (0..PRODUCERS)
        .flat_map(|producer| (0..PER_PRODUCER).map(move |i| Bytes::from(format!("{producer}-{i}"))))
        .collect();
    expected.sort();

    assert_eq!(handled, expected);
    assert!(handler.max_in_flight() <= 4);

    let stats = &dispatcher.stats()[0];
    assert_eq!(stats.submitted, (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(stats.succeeded, (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_handler_does_not_stop_later_messages() {
    init_test_tracing();

    let handler = RecordingHandler::new().panicking_on(b"m1");
    let reporter = RecordingReporter::new();
    let dispatcher = Dispatcher::configure_with_reporter(
        vec![StreamRegistration::new(
            StreamConfig::new(MessageKind::Payload, 10, 1),
            handler.clone(),
        )],
        Arc::new(reporter.clone()),
    )
    .unwrap();

    let reported = reporter.wait_for_reports(3);
    for body in ["m1", "m2", "m3"] {
        dispatcher
            .submit(message(MessageKind::Payload, body))
            .await
            .unwrap();
    }
    reported.notified().await;

    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::HandlerPanic);
    assert_eq!(errors[0].class(), ErrorClass::Permanent);
    assert_eq!(errors[0].message_kind(), Some(MessageKind::Payload));
    assert_eq!(handler.handled().len(), 3);

    let stats = &dispatcher.stats()[0];
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.failed_permanent, 1);
    assert_eq!(stats.succeeded, 2);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_errors_are_reported_with_their_class() {
    init_test_tracing();

    let handler = RecordingHandler::new()
        .failing_on(b"down", ErrorKind::StoreUnavailable)
        .failing_on(b"garbage", ErrorKind::InvalidMessage);
    let reporter = RecordingReporter::new();
    let dispatcher = Dispatcher::configure_with_reporter(
        vec![StreamRegistration::new(
            StreamConfig::new(MessageKind::Header, 10, 1),
            handler,
        )],
        Arc::new(reporter.clone()),
    )
    .unwrap();

    let reported = reporter.wait_for_reports(3);
    for body in ["down", "garbage", "fine"] {
        dispatcher
            .submit(message(MessageKind::Header, body))
            .await
            .unwrap();
    }
    reported.notified().await;

    let classes: Vec<ErrorClass> = reporter.errors().iter().map(|err| err.class()).collect();
    assert_eq!(classes, vec![ErrorClass::Transient, ErrorClass::Permanent]);

    let stats = &dispatcher.stats()[0];
    assert_eq!(stats.failed_transient, 1);
    assert_eq!(stats.failed_permanent, 1);
    assert_eq!(stats.completed(), 3);

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_after_shutdown_fails_without_blocking() {
    init_test_tracing();

    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 1, 1),
        RecordingHandler::new(),
    )])
    .unwrap();

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        dispatcher.state(MessageKind::Header),
        Some(ProcessorState::Stopped)
    );

    let submitted = tokio::time::timeout(
        Duration::from_millis(100),
        dispatcher.submit(message(MessageKind::Header, "late")),
    )
    .await
    .expect("submit after shutdown must not block");

    let err = submitted.unwrap_err();
    assert!(matches!(err, SubmitError::NotRunning(_)));
    assert_eq!(err.into_message().payload().as_ref(), b"late");
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_while_draining_fails_with_not_running() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let handler = RecordingHandler::new().with_gate(&gate);
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 4, 1),
        handler.clone(),
    )])
    .unwrap();

    dispatcher
        .submit(message(MessageKind::Header, "held"))
        .await
        .unwrap();

    let shutdown = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.shutdown(Duration::from_secs(5)).await })
    };
    let mut state_rx_ready = false;
    for _ in 0..100 {
        if dispatcher.state(MessageKind::Header) == Some(ProcessorState::Draining) {
            state_rx_ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(state_rx_ready, "processor never reached the draining state");

    let err = dispatcher
        .submit(message(MessageKind::Header, "rejected"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::NotRunning(_)));

    gate.open();
    shutdown.await.unwrap().unwrap();
    assert_eq!(handler.handled().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_with_idle_streams_returns_immediately() {
    init_test_tracing();

    let dispatcher = Dispatcher::configure(vec![
        StreamRegistration::new(
            StreamConfig::new(MessageKind::Header, 10, 2),
            RecordingHandler::new(),
        ),
        StreamRegistration::new(
            StreamConfig::new(MessageKind::Payload, 10, 4),
            RecordingHandler::new(),
        ),
    ])
    .unwrap();

    let started = Instant::now();
    dispatcher.shutdown(Duration::from_secs(30)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_timeout_lists_streams_that_did_not_drain() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let slow = RecordingHandler::new().with_gate(&gate);
    let fast = RecordingHandler::new();
    let dispatcher = Dispatcher::configure(vec![
        StreamRegistration::new(StreamConfig::new(MessageKind::Header, 4, 1), fast),
        StreamRegistration::new(StreamConfig::new(MessageKind::Payload, 4, 1), slow.clone()),
    ])
    .unwrap();

    dispatcher
        .submit(message(MessageKind::Payload, "stuck"))
        .await
        .unwrap();

    let err = dispatcher
        .shutdown(Duration::from_millis(100))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ShutdownError::Timeout {
            kinds: vec![MessageKind::Payload],
            timeout_ms: 100,
        }
    );
    assert_eq!(
        dispatcher.state(MessageKind::Header),
        Some(ProcessorState::Stopped)
    );
    assert_eq!(
        dispatcher.state(MessageKind::Payload),
        Some(ProcessorState::Draining)
    );

    // The abandoned stream keeps draining in the background.
    let finished = slow.wait_for_finished(1);
    gate.open();
    finished.notified().await;

    for _ in 0..100 {
        if dispatcher.state(MessageKind::Payload) == Some(ProcessorState::Stopped) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        dispatcher.state(MessageKind::Payload),
        Some(ProcessorState::Stopped)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_shutdown_still_drains_every_accepted_message() {
    init_test_tracing();

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(100));
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 4, 1),
        handler.clone(),
    )])
    .unwrap();

    for i in 0..3 {
        dispatcher
            .submit(message(MessageKind::Header, format!("h{i}")))
            .await
            .unwrap();
    }
    let finished = handler.wait_for_finished(3);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        dispatcher.shutdown(Duration::from_secs(10)),
    )
    .await;
    assert!(cancelled.is_err());

    finished.notified().await;
    dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        dispatcher.state(MessageKind::Header),
        Some(ProcessorState::Stopped)
    );
    assert_eq!(
        handler.handled_payloads(),
        vec![
            Bytes::from("h0"),
            Bytes::from("h1"),
            Bytes::from("h2")
        ]
    );
    assert_eq!(dispatcher.stats()[0].succeeded, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_submit_waits_for_capacity() {
    init_test_tracing();

    let gate = HandlerGate::closed();
    let handler = RecordingHandler::new().with_gate(&gate);
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Header, 1, 1).with_backpressure(BackpressurePolicy::Block),
        handler.clone(),
    )])
    .unwrap();

    dispatcher
        .submit(message(MessageKind::Header, "first"))
        .await
        .unwrap();

    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .submit(message(MessageKind::Header, "second"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    let finished = handler.wait_for_finished(2);
    gate.open();
    second.await.unwrap().unwrap();
    finished.notified().await;

    assert_eq!(
        handler.handled_payloads(),
        vec![Bytes::from("first"), Bytes::from("second")]
    );

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_dispatcher_still_drains_accepted_messages() {
    init_test_tracing();

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(10));
    let dispatcher = Dispatcher::configure(vec![StreamRegistration::new(
        StreamConfig::new(MessageKind::Payload, 8, 2),
        handler.clone(),
    )])
    .unwrap();

    let finished = handler.wait_for_finished(5);
    for i in 0..5 {
        dispatcher
            .submit(message(MessageKind::Payload, format!("{i}")))
            .await
            .unwrap();
    }
    drop(dispatcher);

    finished.notified().await;
    assert_eq!(handler.handled().len(), 5);
}
