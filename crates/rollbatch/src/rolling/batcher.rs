use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;

use super::handler::RollingBatchHandler;
use super::RollingBatcher;
use crate::backend::Backend;
use crate::config::RollingBatchConfig;
use crate::core::batch::batch_inference_loop;
use crate::core::handler::BatchHandler;
use crate::core::worker::BatchWorkerHandle;
use crate::core::{ActiveSet, LoopGuard, LoopState};
use crate::error::SchedulerError;
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::session::{RandomSeedSource, Request, ResponseStream, SeedSource, Session};

/// Rolling batch scheduler over a single [`Backend`].
///
/// Owns the active set and the task running the scheduling loop. The loop is
/// spawned on construction, so the scheduler must be created from within a
/// Tokio runtime. Dropping the scheduler stops the loop; sessions still in
/// flight at that point receive a final error chunk.
pub struct RollingBatchScheduler {
    active: Arc<ActiveSet<Session>>,
    handle: BatchWorkerHandle,
    seeds: Arc<dyn SeedSource>,
    content_type: Option<&'static str>,
    metrics: Arc<SchedulerMetrics>,
    state: watch::Receiver<LoopState>,
}

impl RollingBatchScheduler {
    pub fn new<B>(backend: B, config: RollingBatchConfig) -> Result<Self, SchedulerError>
    where
        B: Backend,
    {
        Self::with_seed_source(backend, config, Arc::new(RandomSeedSource))
    }

    /// Like [`new`](Self::new), drawing session seeds from `seeds`.
    pub fn with_seed_source<B>(
        backend: B,
        config: RollingBatchConfig,
        seeds: Arc<dyn SeedSource>,
    ) -> Result<Self, SchedulerError>
    where
        B: Backend,
    {
        config.validate()?;

        let active = Arc::new(ActiveSet::new(config.max_rolling_batch_size));
        let metrics = Arc::new(SchedulerMetrics::new());
        let (state_tx, state_rx) = watch::channel(LoopState::Idle);
        let state_tx = Arc::new(state_tx);

        let handle = BatchWorkerHandle::new({
            let active = active.clone();
            let handler = RollingBatchHandler {
                backend,
                timeout: config.backend_timeout,
                metrics: metrics.clone(),
            };

            move |stop| {
                tokio::spawn(async move {
                    let _guard = LoopGuard::new(stop.clone(), state_tx.clone());
                    let run = batch_inference_loop(&handler, active.clone(), stop.clone(), state_tx);
                    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                        tracing::error!("scheduling loop panicked, ending sessions in flight");
                        // Cancel first so admissions racing the close are refused
                        stop.cancel();
                        let abandoned = active.close(|session| handler.abandon(session)).await;
                        tracing::debug!(abandoned, "sessions abandoned after loop panic");
                    }
                })
            }
        });

        tracing::debug!(
            max_rolling_batch_size = config.max_rolling_batch_size,
            backend_timeout = ?config.backend_timeout,
            "rolling batch scheduler started"
        );

        Ok(Self {
            active,
            handle,
            seeds,
            content_type: config.output_formatter.content_type(),
            metrics,
            state: state_rx,
        })
    }

    /// Admits `request`, waiting up to `timeout` for a free slot.
    ///
    /// See [`RollingBatcher::admit`].
    pub async fn admit(&self, request: Request, timeout: Duration) -> Result<ResponseStream, SchedulerError> {
        let make_session = || Session::new(request, self.seeds.next_seed(), self.content_type);

        match self
            .active
            .blocking_enqueue(make_session, timeout, self.handle.stop_token())
            .await
        {
            Ok((stream, active)) => {
                self.metrics.record_admitted(active);
                tracing::debug!(session = %stream.id(), active, "session admitted");
                Ok(stream)
            }
            Err(err) => {
                if let SchedulerError::AdmissionTimeout { .. } = err {
                    self.metrics.record_admission_timeout(self.active.capacity());
                    tracing::debug!("{err}");
                }
                Err(err)
            }
        }
    }

    /// Stops the scheduling loop. Idempotent; also runs on drop.
    ///
    /// Callers waiting in [`admit`](Self::admit) fail with
    /// [`SchedulerError::AdmissionInterrupted`].
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watches loop state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    pub fn capacity(&self) -> usize {
        self.active.capacity()
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of sessions currently in the active set.
    pub async fn active_count(&self) -> usize {
        self.active.len().await
    }
}

#[async_trait]
impl RollingBatcher for RollingBatchScheduler {
    async fn admit(&self, request: Request, timeout: Duration) -> Result<ResponseStream, SchedulerError> {
        RollingBatchScheduler::admit(self, request, timeout).await
    }
}
