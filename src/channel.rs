//! Fixed-capacity blocking FIFO.
//!
//! This is the hand-off between producers and the container builder, and
//! between the builder and the compression workers. It is the only place in
//! the pipeline where producers wait: when the channel is full, `push` blocks
//! until the consumer makes room.

use crate::error::{BuslogError, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Why [`BoundedChannel::try_push`] refused an item. The item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    /// The channel holds `capacity` items.
    Full(T),
    /// The channel was closed.
    Closed(T),
}

/// A bounded multi-producer, multi-consumer queue.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    state: Mutex<ChannelState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct ChannelState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items.
    ///
    /// # Errors
    /// Returns `BuslogError::Config` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BuslogError::Config(
                "channel capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(ChannelState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    // The state stays consistent across a panic in another holder: every
    // critical section is a single push/pop on the deque.
    fn lock(&self) -> MutexGuard<'_, ChannelState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `item`, blocking while the channel is full.
    ///
    /// # Errors
    /// Returns `BuslogError::Closed` if the channel is closed before or while
    /// waiting; the item is dropped.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        while state.items.len() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(BuslogError::Closed);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues `item` only if a slot is free right now.
    pub fn try_push(&self, item: T) -> std::result::Result<(), TryPushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TryPushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest item, blocking while the channel is empty.
    ///
    /// After `close()` the remaining items are still returned; `None` means
    /// the channel is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
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

    /// Closes the channel and wakes every blocked caller.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Closes the channel and drops everything still queued.
    ///
    /// Returns the number of discarded items.
    pub fn discard(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.items)
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        discarded.len()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once `close()` or `discard()` was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
