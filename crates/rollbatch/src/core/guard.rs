use std::sync::Arc;
use std::thread;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::state::LoopState;

/// # LoopGuard
///
/// Lives on the scheduling loop's task for as long as the loop runs. When it
/// is dropped, whether the loop returned or unwound from a panic, the
/// scheduler is marked [`LoopState::Stopped`] and its stop token is cancelled,
/// so producers blocked on admission fail with
/// [`AdmissionInterrupted`](crate::error::SchedulerError::AdmissionInterrupted)
/// instead of waiting for a loop that is gone.
pub(crate) struct LoopGuard {
    stop: CancellationToken,
    state: Arc<watch::Sender<LoopState>>,
}

impl LoopGuard {
    pub(crate) fn new(stop: CancellationToken, state: Arc<watch::Sender<LoopState>>) -> Self {
        Self { stop, state }
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("scheduling loop panicked, no further batches will run");
        }
        self.state.send_replace(LoopState::Stopped);
        self.stop.cancel();
    }
}
