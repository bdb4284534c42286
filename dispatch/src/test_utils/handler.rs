use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::error::{ErrorKind, ProcessingResult};
use crate::handler::Handler;
use crate::processing_error;
use crate::test_utils::notify::{CountWaiters, TimedNotify};
use crate::types::Message;

#[derive(Debug, Default)]
struct Inner {
    handled: Vec<Message>,
    in_flight: usize,
    max_in_flight: usize,
    waiters: CountWaiters,
}

#[derive(Debug, Clone)]
enum Behavior {
    Panic(Bytes),
    Fail(Bytes, ErrorKind),
}

/// Handler recording every message it sees, with optional delays and injected failures.
///
/// Messages are recorded when the handler starts working on them, failing and panicking
/// invocations included.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    inner: Arc<Mutex<Inner>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    behaviors: Vec<Behavior>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Blocks every invocation until [`HandlerGate::open`] releases it.
    pub fn with_gate(mut self, gate: &HandlerGate) -> Self {
        self.gate = Some(gate.semaphore.clone());
        self
    }

    /// Panics on messages whose payload equals `payload`.
    pub fn panicking_on(mut self, payload: &'static [u8]) -> Self {
        self.behaviors
            .push(Behavior::Panic(Bytes::from_static(payload)));
        self
    }

    /// Fails with `kind` on messages whose payload equals `payload`.
    pub fn failing_on(mut self, payload: &'static [u8], kind: ErrorKind) -> Self {
        self.behaviors
            .push(Behavior::Fail(Bytes::from_static(payload), kind));
        self
    }

    /// Messages seen so far, in the order handlers started on them.
    pub fn handled(&self) -> Vec<Message> {
        self.inner.lock().unwrap().handled.clone()
    }

    pub fn handled_payloads(&self) -> Vec<Bytes> {
        self.handled()
            .into_iter()
            .map(Message::into_payload)
            .collect()
    }

    /// Highest number of concurrent invocations observed.
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }

    /// Returns a notification fired once `count` invocations have finished.
    pub fn wait_for_finished(&self, count: usize) -> TimedNotify {
        let mut inner = self.inner.lock().unwrap();
        let finished = inner.handled.len() - inner.in_flight;
        inner.waiters.register(count, finished)
    }

    fn begin(&self, message: &Message) {
        let mut inner = self.inner.lock().unwrap();
        inner.handled.push(message.clone());
        inner.in_flight += 1;
        inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
    }

    fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight -= 1;
        let finished = inner.handled.len() - inner.in_flight;
        inner.waiters.update(finished);
    }
}

/// Marks an invocation as finished even when the handler panics.
struct FinishGuard<'a>(&'a RecordingHandler);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

impl Handler for RecordingHandler {
    async fn handle(&self, message: Message) -> ProcessingResult<()> {
        self.begin(&message);
        let _finish = FinishGuard(self);

        if let Some(gate) = &self.gate {
            let _ = gate.acquire().await;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        for behavior in &self.behaviors {
            match behavior {
                Behavior::Panic(payload) if payload == message.payload() => {
                    panic!("injected panic for payload {payload:?}");
                }
                Behavior::Fail(payload, kind) if payload == message.payload() => {
                    return Err(processing_error!(*kind, "Injected handler failure"));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Holds [`RecordingHandler`] invocations until opened.
#[derive(Debug, Clone)]
pub struct HandlerGate {
    semaphore: Arc<Semaphore>,
}

impl HandlerGate {
    pub fn closed() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
        }
    }

    /// Releases every current and future invocation.
    pub fn open(&self) {
        // Waiters on a closed semaphore return immediately.
        self.semaphore.close();
    }
}
