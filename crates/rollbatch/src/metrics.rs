//! Counters for the rolling batch scheduler.
//!
//! Besides the atomic counters, admission-side gauges are emitted as `tracing`
//! events on the `server_metric` target so an external collector can pick them up.

use std::sync::atomic::{AtomicU64, Ordering};

/// Target used for metric events.
pub const METRIC_TARGET: &str = "server_metric";

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Sessions accepted into the active set
    pub sessions_admitted: AtomicU64,

    /// Admissions rejected because no slot freed up in time
    pub admission_timeouts: AtomicU64,

    /// Backend calls issued
    pub batches_dispatched: AtomicU64,

    /// Backend calls whose whole batch was aborted
    pub batch_failures: AtomicU64,

    /// Sessions that received their final chunk
    pub sessions_completed: AtomicU64,

    /// Largest batch sent to the backend
    pub max_batch_size: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admission; `active` is the active set size right after insertion.
    pub fn record_admitted(&self, active: usize) {
        self.sessions_admitted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: METRIC_TARGET,
            metric = "RollingBatchSize",
            value = active,
            unit = "Count"
        );
    }

    /// Record a caller giving up on admission while `active` slots were taken.
    pub fn record_admission_timeout(&self, active: usize) {
        self.admission_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: METRIC_TARGET,
            metric = "RollingTimeout",
            value = active,
            unit = "Count"
        );
    }

    pub fn record_dispatch(&self, batch_size: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.max_batch_size.fetch_max(batch_size as u64, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, count: usize) {
        self.sessions_completed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_admitted: self.sessions_admitted.load(Ordering::Relaxed),
            admission_timeouts: self.admission_timeouts.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            max_batch_size: self.max_batch_size.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_admitted: u64,
    pub admission_timeouts: u64,
    pub batches_dispatched: u64,
    pub batch_failures: u64,
    pub sessions_completed: u64,
    pub max_batch_size: u64,
}
