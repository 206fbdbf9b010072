//! FIFO record buffer between producers and the delivery worker.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::record::LogRecord;

/// What a bounded queue does with a new record when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the producer until the worker frees a slot.
    Block,
    /// Evict the oldest queued record to make room.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Always accepts. Memory grows without limit if producers outrun the
    /// worker for long enough.
    Unbounded,
    Bounded { capacity: usize, policy: OverflowPolicy },
}

impl QueueMode {
    /// Resolve the `async_queue_size` / `async_queue_drop_oldest` pair.
    ///
    /// A size of `0` means unbounded and ignores `drop_oldest`.
    pub fn from_settings(capacity: usize, drop_oldest: bool) -> Self {
        match (capacity, drop_oldest) {
            (0, _) => QueueMode::Unbounded,
            (capacity, true) => QueueMode::Bounded {
                capacity,
                policy: OverflowPolicy::DropOldest,
            },
            (capacity, false) => QueueMode::Bounded {
                capacity,
                policy: OverflowPolicy::Block,
            },
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match self {
            QueueMode::Unbounded => None,
            QueueMode::Bounded { capacity, .. } => Some(*capacity),
        }
    }
}

/// Returned by [`RecordQueue::enqueue`] once the queue is closed. Carries the
/// rejected record back to the caller.
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("record queue is closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

/// Point-in-time counters.
///
/// `enqueued == dequeued + queued + dropped` holds for every snapshot.
/// `rejected` counts attempts made after close and is not part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub queued: usize,
    /// Largest number of records held at once.
    pub high_water: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    stats: QueueStats,
}

/// Many-producer queue with a configurable overflow policy.
///
/// Producers call [`enqueue`](Self::enqueue) from any thread. Consumers use
/// the blocking [`dequeue`](Self::dequeue) or, from async code,
/// [`recv`](Self::recv). Both return `None` only once the queue is closed
/// *and* empty.
pub struct RecordQueue<T = LogRecord> {
    mode: QueueMode,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    async_waiters: Notify,
}

impl<T> RecordQueue<T> {
    pub fn new(mode: QueueMode) -> Self {
        let mode = match mode {
            QueueMode::Bounded { capacity: 0, .. } => QueueMode::Unbounded,
            mode => mode,
        };
        let items = match mode {
            QueueMode::Bounded { capacity, .. } => VecDeque::with_capacity(capacity),
            QueueMode::Unbounded => VecDeque::new(),
        };
        Self {
            mode,
            state: Mutex::new(State {
                items,
                closed: false,
                stats: QueueStats::default(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            async_waiters: Notify::new(),
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Nothing panics while holding the lock, but a poisoned queue must
        // keep draining.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `record` at the tail according to the configured policy.
    ///
    /// Under [`OverflowPolicy::Block`] this parks the calling thread while
    /// the queue is full. Fails only when the queue has been closed.
    pub fn enqueue(&self, record: T) -> Result<(), QueueClosed<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                state.stats.rejected += 1;
                return Err(QueueClosed(record));
            }
            match self.mode {
                QueueMode::Unbounded => break,
                QueueMode::Bounded {
                    capacity,
                    policy: OverflowPolicy::Block,
                } => {
                    if state.items.len() < capacity {
                        break;
                    }
                    state = self
                        .not_full
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                QueueMode::Bounded {
                    capacity,
                    policy: OverflowPolicy::DropOldest,
                } => {
                    while state.items.len() >= capacity {
                        if state.items.pop_front().is_none() {
                            break;
                        }
                        state.stats.dropped += 1;
                    }
                    break;
                }
            }
        }

        state.items.push_back(record);
        state.stats.enqueued += 1;
        state.stats.high_water = state.stats.high_water.max(state.items.len());
        drop(state);

        self.not_empty.notify_one();
        self.async_waiters.notify_waiters();
        Ok(())
    }

    fn take_front(&self, state: &mut State<T>) -> Option<T> {
        let record = state.items.pop_front()?;
        state.stats.dequeued += 1;
        self.not_full.notify_one();
        Some(record)
    }

    /// Pop the oldest record without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        self.take_front(&mut state)
    }

    /// Pop the oldest record, parking the thread while the queue is empty
    /// and still open.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(record) = self.take_front(&mut state) {
                return Some(record);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Async counterpart of [`dequeue`](Self::dequeue).
    pub async fn recv(&self) -> Option<T> {
        let notified = self.async_waiters.notified();
        tokio::pin!(notified);
        loop {
            // Register before checking so a concurrent enqueue cannot slip
            // between the check and the wait.
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(record) = self.take_front(&mut state) {
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }
            notified.as_mut().await;
            notified.set(self.async_waiters.notified());
        }
    }

    /// Stop accepting records. Queued records stay available to consumers;
    /// every blocked producer and consumer is woken.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.async_waiters.notify_waiters();
    }

    /// Count a record refused before it reached the queue.
    pub(crate) fn note_rejected(&self) {
        self.lock().stats.rejected += 1;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.lock().stats.dropped
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.items.len(),
            ..state.stats
        }
    }
}
