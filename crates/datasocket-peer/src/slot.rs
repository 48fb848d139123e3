use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Single-value handoff between one producer and one consumer loop.
///
/// Publishing while a value is still undelivered replaces it: the consumer
/// only ever sees the most recent value, and at most one value is pending.
/// A closed slot wakes every waiter and keeps its last value readable.
#[derive(Debug)]
pub struct LatestValue<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    fresh: bool,
    closed: bool,
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                fresh: false,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new value and wake the consumer.
    ///
    /// Returns true when an undelivered value was discarded.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.lock();
        let replaced = state.fresh;
        state.value = Some(value);
        state.fresh = true;
        self.changed.notify_all();
        replaced
    }

    /// Return a value the consumer took but could not deliver.
    ///
    /// Ignored when a newer value was published in the meantime.
    pub fn put_back(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.fresh {
            return false;
        }
        state.value = Some(value);
        state.fresh = true;
        self.changed.notify_all();
        true
    }

    /// Move the pending value out, if any (never blocks).
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        Self::take_fresh(&mut state)
    }

    /// Wait up to `timeout` for a pending value and move it out.
    ///
    /// Returns `None` on timeout or when the slot is closed.
    pub fn wait_take(&self, timeout: Duration) -> Option<T> {
        let mut state = self.wait_fresh_locked(timeout)?;
        Self::take_fresh(&mut state)
    }

    fn take_fresh(state: &mut SlotState<T>) -> Option<T> {
        if !state.fresh {
            return None;
        }
        state.fresh = false;
        state.value.take()
    }

    fn wait_fresh_locked(&self, timeout: Duration) -> Option<MutexGuard<'_, SlotState<T>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.fresh {
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(state)
    }

    /// True while a published value has not been consumed.
    pub fn has_pending(&self) -> bool {
        self.lock().fresh
    }

    /// Wake every waiter; waits return `None` until [`reopen`](Self::reopen).
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T: Clone> LatestValue<T> {
    /// Wait up to `timeout` for a pending value and return a copy, marking
    /// it consumed but keeping it readable through [`latest`](Self::latest).
    pub fn wait_fresh(&self, timeout: Duration) -> Option<T> {
        let mut state = self.wait_fresh_locked(timeout)?;
        state.fresh = false;
        state.value.clone()
    }

    /// Copy of the most recent value, consumed or not.
    pub fn latest(&self) -> Option<T> {
        self.lock().value.clone()
    }
}
