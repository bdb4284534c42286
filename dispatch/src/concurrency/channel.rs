//! Fixed-capacity FIFO queue shared by the producers and the workers of one stream.
//!
//! Capacity is tracked with a [`Semaphore`]: a producer takes one permit per message and the
//! permit only goes back once the worker that dequeued the message drops the returned
//! [`Slot`]. Queued plus in-flight messages therefore never exceed the capacity. The queue and
//! the closed flag live under a single lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

use crate::types::BackpressurePolicy;

/// Why an item could not be enqueued. The item is handed back in both cases.
#[derive(Debug, Error)]
pub enum EnqueueError<T> {
    #[error("channel is full")]
    Full(T),
    #[error("channel is closed")]
    Closed(T),
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Full(item) | EnqueueError::Closed(item) => item,
        }
    }
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    slots: Semaphore,
    items: Notify,
    capacity: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capacity held by a dequeued item, released when dropped.
#[must_use = "dropping the slot immediately frees capacity before the item is processed"]
pub struct Slot<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        self.shared.slots.add_permits(1);
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").finish_non_exhaustive()
    }
}

/// Bounded multi-producer multi-consumer channel with a configurable [`BackpressurePolicy`].
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
    policy: BackpressurePolicy,
}

impl<T> BoundedChannel<T> {
    /// Creates an open channel holding at most `capacity` unfinished items.
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                slots: Semaphore::new(capacity),
                items: Notify::new(),
                capacity,
            }),
            policy,
        }
    }

    /// Appends an item to the back of the queue.
    ///
    /// With [`BackpressurePolicy::Block`] the caller waits for a free slot, with
    /// [`BackpressurePolicy::RejectWhenFull`] it gets [`EnqueueError::Full`] right away.
    /// Closing the channel wakes blocked callers with [`EnqueueError::Closed`].
    pub async fn send(&self, item: T) -> Result<(), EnqueueError<T>> {
        let permit = match self.policy {
            BackpressurePolicy::Block => match self.shared.slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(EnqueueError::Closed(item)),
            },
            BackpressurePolicy::RejectWhenFull => match self.shared.slots.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => return Err(EnqueueError::Full(item)),
                Err(TryAcquireError::Closed) => return Err(EnqueueError::Closed(item)),
            },
        };

        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(EnqueueError::Closed(item));
            }

            // The slot now belongs to the item and is returned through its `Slot`.
            permit.forget();
            state.queue.push_back(item);
        }

        self.shared.items.notify_one();

        Ok(())
    }

    /// Takes the oldest item, waiting while the channel is empty.
    ///
    /// Returns [`None`] once the channel is closed and every item has been taken.
    pub async fn recv(&self) -> Option<(T, Slot<T>)> {
        loop {
            let notified = self.shared.items.notified();
            tokio::pin!(notified);
            // Register before inspecting the queue so a concurrent `send` cannot be missed.
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(item) = state.queue.pop_front() {
                    let slot = Slot {
                        shared: self.shared.clone(),
                    };
                    return Some((item, slot));
                }

                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting items. Items already queued can still be received.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        self.shared.slots.close();
        self.shared.items.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of items waiting to be received.
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of received items whose [`Slot`] is still held.
    pub fn in_flight(&self) -> usize {
        let queued = self.len();
        let free = self.shared.slots.available_permits();
        self.shared.capacity.saturating_sub(free + queued)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            policy: self.policy,
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.shared.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
