use std::time::Duration;

use async_trait::async_trait;

use crate::error::SchedulerError;
use crate::session::{Request, ResponseStream};

/// # RollingBatcher
///
/// The caller-facing side of a rolling batch scheduler.
///
/// A request handed to [`admit`](RollingBatcher::admit) joins the running
/// batch as soon as a slot is free and stays in it, one backend call per
/// generated fragment, until the backend marks its output as last. The caller
/// reads fragments from the returned [`ResponseStream`] while the batch keeps
/// rolling.
///
/// ## Backpressure
///
/// The batch holds at most a fixed number of sessions. When it is full,
/// `admit` waits for a session to finish, up to `timeout`, and then gives up
/// with [`SchedulerError::AdmissionTimeout`]. Nothing is queued on the
/// caller's behalf after that.
#[async_trait]
pub trait RollingBatcher {
    /// Admits `request` into the active batch.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::AdmissionTimeout`] if no slot freed up within `timeout`
    /// * [`SchedulerError::AdmissionInterrupted`] if the scheduler is stopping or
    ///   already stopped
    async fn admit(&self, request: Request, timeout: Duration) -> Result<ResponseStream, SchedulerError>;
}
