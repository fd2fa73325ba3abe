//! The bounded hand-off between reader tasks and consumer threads.
//!
//! Producers live on the reactor, so the full-ring wait is async; the
//! consumer is a plain thread, so the empty-ring wait is a condvar. Both
//! sides share one small mutex-guarded state. `stop()` is the terminal
//! transition: it wakes everything, producers fail fast, and consumers
//! drain what is queued before seeing [`RingError::Stopped`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use tokio::sync::Notify;

/// Why a ring operation did not return an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// `try_push` found the ring at capacity.
    Full,
    /// `try_pop` found the ring empty (but not stopped).
    Empty,
    /// The ring was stopped and has been fully drained.
    Stopped,
}

impl core::fmt::Display for RingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            RingError::Full => "ring full",
            RingError::Empty => "ring empty",
            RingError::Stopped => "ring stopped",
        })
    }
}

impl std::error::Error for RingError {}

/// `try_push` failure carrying the rejected element back to the caller.
#[derive(Debug)]
pub enum TryPushError<T> {
    Full(T),
    Stopped(T),
}

struct State<T> {
    queue: VecDeque<T>,
    stopped: bool,
}

/// A fixed-capacity FIFO with a stopped terminal state.
pub struct Ring<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    /// Wakes blocked consumers (plain threads).
    consumers: Condvar,
    /// Wakes producers parked on a full ring (reactor tasks).
    producers: Notify,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            capacity,
            consumers: Condvar::new(),
            producers: Notify::new(),
        }
    }

    /// Append an element, waiting for space when the ring is full.
    ///
    /// This is the back-pressure point: a reader stalls here until the
    /// consumer pops. Fails only once the ring is stopped.
    pub async fn push(&self, item: T) -> Result<(), RingError> {
        loop {
            let notified = self.producers.notified();
            tokio::pin!(notified);
            {
                let mut state = self.state.lock().unwrap();
                if state.stopped {
                    return Err(RingError::Stopped);
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(item);
                    drop(state);
                    self.consumers.notify_one();
                    return Ok(());
                }
                // Arm the wakeup while still holding the lock so a pop
                // between unlock and await cannot be missed.
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Append without waiting.
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(TryPushError::Stopped(item));
        }
        if state.queue.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }
        state.queue.push_back(item);
        drop(state);
        self.consumers.notify_one();
        Ok(())
    }

    /// Remove the oldest element, blocking while the ring is empty.
    ///
    /// After `stop()`, queued elements continue to drain; only an empty,
    /// stopped ring returns [`RingError::Stopped`]. Call from consumer
    /// threads, not from the reactor.
    pub fn pop(&self) -> Result<T, RingError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.queue.pop_front() {
                self.producers.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(RingError::Stopped);
            }
            state = self.consumers.wait(state).unwrap();
        }
    }

    /// Remove the oldest element without blocking.
    pub fn try_pop(&self) -> Result<T, RingError> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.queue.pop_front() {
            self.producers.notify_one();
            return Ok(item);
        }
        if state.stopped {
            Err(RingError::Stopped)
        } else {
            Err(RingError::Empty)
        }
    }

    /// Enter the terminal state and wake every waiter on both sides.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        drop(state);
        self.consumers.notify_all();
        self.producers.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
