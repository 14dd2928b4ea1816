//! Error types for the rolling batch scheduler.
//!
//! Admission errors are returned synchronously to the caller of
//! [`admit`](crate::rolling::RollingBatchScheduler::admit). Batch-level failures
//! never reach a caller directly: the scheduling loop absorbs them and turns
//! them into per-session terminal results.

use std::time::Duration;

/// Errors surfaced to callers of the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No batch slot became free before the caller's deadline.
    #[error("Time out in: {timeout:?}")]
    AdmissionTimeout { timeout: Duration },

    /// The scheduler stopped while the caller was waiting for a slot,
    /// or before the caller asked for one.
    #[error("Interrupted")]
    AdmissionInterrupted,

    /// The scheduler was built with an unusable configuration.
    #[error("Invalid rolling batch configuration: {0}")]
    Config(String),
}

/// Errors a [`Backend`](crate::backend::Backend) may return instead of an output.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend process could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend gave up on the call.
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was abandoned because the scheduler is stopping.
    #[error("Backend call cancelled")]
    Cancelled,

    /// The backend answered with something that could not be decoded.
    #[error("Malformed backend output: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl BackendError {
    /// Status code used when this error is folded into a failed batch output.
    pub fn status_code(&self) -> u16 {
        match self {
            BackendError::Unavailable(_) => 503,
            BackendError::Timeout(_) => 408,
            BackendError::Cancelled => 499,
            BackendError::Malformed(_) => 500,
        }
    }
}

/// Whole-batch failures detected by the response demultiplexer.
///
/// Both variants lead to the same remediation: every session of the batch is
/// completed with an error and the next batch carries the reset marker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchFailure {
    /// The backend returned a non-success status for the batch.
    #[error("Batch inference failed with code {code}: {message}")]
    Invocation { code: u16, message: String },

    /// The backend returned a different number of slots than were sent.
    #[error("Batch output size mismatch, expected: {expected}, actual: {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

impl BatchFailure {
    /// Status code attached to the synthesized error result of every aborted session.
    pub fn code(&self) -> u16 {
        match self {
            BatchFailure::Invocation { code, .. } => *code,
            BatchFailure::ShapeMismatch { .. } => 500,
        }
    }
}
