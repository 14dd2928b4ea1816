//! The scheduler's shared state: a bounded, ordered set of in-flight items
//! guarded by one fair lock, with two named wait queues.
//!
//! - `capacity_available` wakes producers blocked in [`ActiveSet::blocking_enqueue`]
//! - `work_available` wakes the scheduling loop blocked in [`ActiveSet::wait_for_work`]
//!
//! Waiters create their `Notified` future before inspecting the state under the
//! lock, so a signal sent between the check and the wait is never lost. Freed
//! slots are signalled one wake-up per slot, oldest waiter first.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BatchFailure, SchedulerError};

/// Items that can tell whether they are done and may leave the active set.
pub trait Completion {
    fn is_completed(&self) -> bool;
}

/// State behind the active set's lock.
#[derive(Debug)]
pub struct ActiveState<T> {
    items: Vec<T>,

    /// Armed after a batch was discarded; consumed by the next snapshot.
    reset: bool,
}

impl<T> ActiveState<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_reset_armed(&self) -> bool {
        self.reset
    }
}

pub struct ActiveSet<T> {
    state: Mutex<ActiveState<T>>,
    capacity: usize,
    capacity_available: Notify,
    work_available: Notify,
}

impl<T: Completion> ActiveSet<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ActiveState {
                items: Vec::with_capacity(capacity),
                reset: false,
            }),
            capacity,
            capacity_available: Notify::new(),
            work_available: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Runs `f` against the current state under the lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&ActiveState<T>) -> R) -> R {
        f(&*self.state.lock().await)
    }

    /// Appends the item built by `make` if a slot is free.
    ///
    /// `make` is only called when the item is actually admitted. Returns the
    /// handle produced alongside the item and the set's size after insertion.
    pub async fn try_enqueue<H>(&self, make: impl FnOnce() -> (T, H)) -> Option<(H, usize)> {
        let mut state = self.state.lock().await;
        if state.len() >= self.capacity {
            return None;
        }
        Some(self.push(&mut state, make))
    }

    /// Appends the item built by `make`, waiting up to `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::AdmissionTimeout`] if no slot frees up in time
    /// * [`SchedulerError::AdmissionInterrupted`] if `stop` is cancelled before
    ///   or while waiting
    ///
    /// Neither error leaves anything behind in the set.
    pub async fn blocking_enqueue<H>(
        &self,
        make: impl FnOnce() -> (T, H),
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Result<(H, usize), SchedulerError> {
        if stop.is_cancelled() {
            return Err(SchedulerError::AdmissionInterrupted);
        }
        // Too far out to represent means no deadline at all
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.acquire_slot(deadline, timeout, stop).await?;
        Ok(self.push(&mut state, make))
    }

    async fn acquire_slot(
        &self,
        deadline: Option<Instant>,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Result<MutexGuard<'_, ActiveState<T>>, SchedulerError> {
        loop {
            let capacity_freed = self.capacity_available.notified();
            tokio::pin!(capacity_freed);
            capacity_freed.as_mut().enable();

            let state = self.state.lock().await;
            // The loop closes the set only after `stop` fires
            if stop.is_cancelled() {
                return Err(SchedulerError::AdmissionInterrupted);
            }
            if state.len() < self.capacity {
                return Ok(state);
            }
            tracing::debug!(capacity = self.capacity, "exceed max_rolling_batch_size");
            drop(state);

            tokio::select! {
                _ = &mut capacity_freed => {}
                _ = stop.cancelled() => return Err(SchedulerError::AdmissionInterrupted),
                _ = expire(deadline) => {
                    return Err(SchedulerError::AdmissionTimeout { timeout });
                }
            }
        }
    }

    fn push<H>(&self, state: &mut ActiveState<T>, make: impl FnOnce() -> (T, H)) -> (H, usize) {
        let (item, handle) = make();
        state.items.push(item);
        self.work_available.notify_one();
        (handle, state.len())
    }

    /// Waits until the set is non-empty. Returns `false` if `stop` fired first.
    pub async fn wait_for_work(&self, stop: &CancellationToken) -> bool {
        loop {
            let work = self.work_available.notified();
            tokio::pin!(work);
            work.as_mut().enable();

            if stop.is_cancelled() {
                return false;
            }
            if !self.state.lock().await.is_empty() {
                return true;
            }

            tokio::select! {
                _ = &mut work => {}
                _ = stop.cancelled() => return false,
            }
        }
    }

    /// Builds a batch from the current items under the lock.
    ///
    /// `build` receives the items in insertion order and whether the reset
    /// marker is due; the marker is consumed by this call. Returns the built
    /// batch with the number of items it covers, or `None` if the set is empty.
    /// Items appended later land behind that prefix, so the first `n` items
    /// stay the snapshot until [`ActiveSet::settle`].
    pub async fn drain_snapshot<R>(&self, build: impl FnOnce(&[T], bool) -> R) -> Option<(R, usize)> {
        let mut state = self.state.lock().await;
        if state.is_empty() {
            return None;
        }
        let reset = std::mem::take(&mut state.reset);
        let batch = build(&state.items, reset);
        Some((batch, state.len()))
    }

    /// Applies a batch result to the first `snapshot_len` items under the lock.
    ///
    /// A [`BatchFailure`] from `apply` arms the reset marker and discards the
    /// whole set: items appended after the snapshot are handed to `discard`
    /// with the same failure. Otherwise completed items are evicted, keeping
    /// the relative order of the rest. Waiting producers are then woken, one
    /// per freed slot. Returns how many items were evicted.
    pub async fn settle(
        &self,
        snapshot_len: usize,
        apply: impl FnOnce(&mut [T]) -> Result<(), BatchFailure>,
        mut discard: impl FnMut(&mut T, &BatchFailure),
    ) -> usize {
        let mut state = self.state.lock().await;
        let snapshot_len = snapshot_len.min(state.len());
        let before = state.len();

        match apply(&mut state.items[..snapshot_len]) {
            Ok(()) => state.items.retain(|item| !item.is_completed()),
            Err(failure) => {
                state.reset = true;
                state.items[snapshot_len..]
                    .iter_mut()
                    .for_each(|item| discard(item, &failure));
                state.items.clear();
            }
        }

        let evicted = before - state.len();
        let free = self.capacity.saturating_sub(state.len());
        for _ in 0..evicted.min(free) {
            self.capacity_available.notify_one();
        }
        evicted
    }

    /// Runs `abort` on every item and empties the set.
    pub async fn close(&self, mut abort: impl FnMut(&mut T)) -> usize {
        let mut state = self.state.lock().await;
        state.items.iter_mut().for_each(&mut abort);
        let closed = state.len();
        state.items.clear();
        self.capacity_available.notify_waiters();
        closed
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
