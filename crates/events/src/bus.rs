//! Ordered session event channel.
//!
//! [`EventBus`] carries the progress of one restart session from the
//! coordinator (the only producer) to whichever stream endpoint is pulling
//! from it. Unlike a broadcast channel every event is consumed exactly once,
//! in publish order.
//!
//! A session's events always end with exactly one [`SessionEvent::Terminal`].
//! Appending the terminal event *seals* the bus: later publishes are dropped
//! until the next [`EventBus::reset`], which starts a new session with an
//! empty queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cmctl_core::log_event::{LogEvent, Outcome};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// One item on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Progress(LogEvent),
    /// End of the session's stream. Always the last event of a session.
    Terminal(Outcome),
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default queue capacity.
const DEFAULT_CAPACITY: usize = 1024;

struct BusState {
    queue: VecDeque<SessionEvent>,
    sealed: bool,
}

/// Bounded, ordered, single-logical-consumer event queue.
///
/// When the queue is full the oldest progress event is dropped to make room;
/// the terminal event is always the newest entry, so it is never the one
/// evicted.
pub struct EventBus {
    state: Mutex<BusState>,
    notify: Notify,
    capacity: usize,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                queue: VecDeque::new(),
                sealed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(2),
        }
    }

    /// Append a progress event.
    ///
    /// Returns `false` (and drops the event) if the current session has
    /// already been terminated.
    pub fn publish(&self, event: LogEvent) -> bool {
        let mut state = self.lock();
        if state.sealed {
            tracing::trace!(text = %event.text, "Dropping event published after terminal");
            return false;
        }
        self.push(&mut state, SessionEvent::Progress(event));
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Append the terminal event and seal the bus.
    ///
    /// Returns `false` if the session was already terminated.
    pub fn finish(&self, outcome: Outcome) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        self.push(&mut state, SessionEvent::Terminal(outcome));
        state.sealed = true;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Discard everything queued, append `notice` and the terminal event,
    /// and seal the bus, all under one lock.
    ///
    /// Returns `false` if the session was already terminated, in which case
    /// nothing is changed.
    pub fn terminate(&self, notice: LogEvent, outcome: Outcome) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.queue.clear();
        state.queue.push_back(SessionEvent::Progress(notice));
        state.queue.push_back(SessionEvent::Terminal(outcome));
        state.sealed = true;
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Purge all queued events and unseal the bus for a new session.
    pub fn reset(&self) {
        let mut state = self.lock();
        let purged = state.queue.len();
        state.queue.clear();
        state.sealed = false;
        if purged > 0 {
            tracing::debug!(purged, "Purged stale session events");
        }
    }

    /// Whether the current session's terminal event has been appended.
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Number of undelivered events.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next event if one is queued.
    pub fn try_consume(&self) -> Option<SessionEvent> {
        self.lock().queue.pop_front()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `None` when the timeout elapses with nothing to deliver.
    pub async fn consume_blocking(&self, timeout: Duration) -> Option<SessionEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_consume() {
                return Some(event);
            }
            // `notify_one` stores a permit when nobody is waiting, so an
            // event pushed between the check above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    fn push(&self, state: &mut BusState, event: SessionEvent) {
        if state.queue.len() >= self.capacity {
            state.queue.pop_front();
            tracing::debug!(capacity = self.capacity, "Event bus full, dropped oldest event");
        }
        state.queue.push_back(event);
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
