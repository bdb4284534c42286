use std::time::Duration;
use std::{fmt, sync::Arc};

use tokio::sync::Notify;
use tokio::time::timeout;

/// Default time a test waits for a notification before failing.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Notify`] wrapper that fails the test instead of hanging when nothing arrives.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout_duration: Duration,
}

impl TimedNotify {
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(notify: Arc<Notify>, timeout_duration: Duration) -> Self {
        Self {
            notify,
            timeout_duration,
        }
    }

    /// Waits for the notification.
    ///
    /// # Panics
    ///
    /// Panics when the timeout elapses first.
    pub async fn notified(&self) {
        if timeout(self.timeout_duration, self.notify.notified())
            .await
            .is_err()
        {
            panic!(
                "test notification timed out after {:?}, the awaited condition was never reached",
                self.timeout_duration
            );
        }
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout_duration", &self.timeout_duration)
            .finish()
    }
}

/// Notifies waiters once a counter reaches their threshold.
#[derive(Debug, Default)]
pub(crate) struct CountWaiters {
    waiters: Vec<(usize, Arc<Notify>)>,
}

impl CountWaiters {
    /// Registers a waiter, firing it right away when `current` already satisfies it.
    pub(crate) fn register(&mut self, target: usize, current: usize) -> TimedNotify {
        let notify = Arc::new(Notify::new());
        if current >= target {
            notify.notify_one();
        } else {
            self.waiters.push((target, notify.clone()));
        }

        TimedNotify::new(notify)
    }

    pub(crate) fn update(&mut self, current: usize) {
        self.waiters.retain(|(target, notify)| {
            if current >= *target {
                notify.notify_one();
                false
            } else {
                true
            }
        });
    }
}
