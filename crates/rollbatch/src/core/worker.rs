//! Module for handling the background scheduling task.

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A handle for managing the background task that runs the scheduling loop.
///
/// Stopping is cooperative: [`shutdown`](Self::shutdown) cancels the stop
/// token and the task is expected to observe it at its next safe point.
///
/// # Example
///
/// ```ignore
/// use rollbatch::core::worker::BatchWorkerHandle;
/// use std::time::Duration;
///
/// async fn example() {
///     let worker = BatchWorkerHandle::new(|stop| {
///         tokio::spawn(async move {
///             while !stop.is_cancelled() {
///                 tokio::select! {
///                     _ = stop.cancelled() => {}
///                     _ = tokio::time::sleep(Duration::from_secs(5)) => println!("tick"),
///                 }
///             }
///         })
///     });
///
///     // Worker will be shut down when dropped
/// }
/// ```
pub struct BatchWorkerHandle {
    /// Cancelled once the task should stop
    stop: CancellationToken,

    /// Handle to the spawned task, becomes `None` after shutdown is initiated
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchWorkerHandle {
    /// Spawns the background task through `task`, handing it the stop token.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let stop = CancellationToken::new();
        let handle = task(stop.clone());

        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Initiates a graceful shutdown of the background task.
    ///
    /// Safe to call any number of times. The task is awaited on a detached
    /// task so that a panic inside it is logged rather than lost; outside of a
    /// Tokio runtime the task is only signalled.
    pub fn shutdown(&self) {
        self.stop.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let (Some(handle), Ok(runtime)) = (handle, tokio::runtime::Handle::try_current()) {
            runtime.spawn(async move {
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        tracing::error!("scheduling task panicked: {err}");
                    }
                }
            });
        }
    }

    #[cfg(test)]
    fn has_handle(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for BatchWorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
