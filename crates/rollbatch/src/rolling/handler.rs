use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::assembler::assemble_batch;
use super::demux::{abort_batch, demultiplex, error_payload};
use crate::backend::{Backend, BackendOutput, BatchInput};
use crate::core::handler::BatchHandler;
use crate::error::{BackendError, BatchFailure};
use crate::metrics::SchedulerMetrics;
use crate::session::{ResultStatus, Session};

/// Message given to sessions still in flight when the scheduler stops.
pub const SCHEDULER_STOPPED_MESSAGE: &str = "Rolling batch scheduler stopped";

/// Drives sessions through a [`Backend`], one token-step per batch.
pub(crate) struct RollingBatchHandler<B> {
    pub(crate) backend: B,
    pub(crate) timeout: Duration,
    pub(crate) metrics: Arc<SchedulerMetrics>,
}

#[async_trait]
impl<B> BatchHandler for RollingBatchHandler<B>
where
    B: Backend,
{
    type Request = Session;
    type ModelInput = BatchInput;
    type ModelOutput = BackendOutput;

    fn make_batch_input(&self, requests: &[Session], reset: bool) -> BatchInput {
        if reset {
            tracing::debug!(batch_size = requests.len(), "asking backend to reset its rolling batch");
        }
        assemble_batch(requests, reset)
    }

    /// Calls the backend under the configured deadline.
    ///
    /// Transport failures and an elapsed deadline are folded into an error
    /// output so the demultiplexer treats them like any other failed batch.
    async fn forward(&self, batch: BatchInput, cancel: CancellationToken) -> BackendOutput {
        self.metrics.record_dispatch(batch.batch_size().unwrap_or(0));

        match tokio::time::timeout(self.timeout, self.backend.invoke(batch, self.timeout, cancel)).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                tracing::warn!("backend call failed: {err}");
                err.into()
            }
            Err(_) => {
                let err = BackendError::Timeout(self.timeout);
                tracing::warn!("{err}");
                err.into()
            }
        }
    }

    fn handle_outputs(&self, batch: &mut [Session], output: BackendOutput) -> Result<(), BatchFailure> {
        match demultiplex(batch, output) {
            Ok(report) => {
                self.metrics.record_completed(report.completed);
                Ok(())
            }
            Err(failure) => {
                match &failure {
                    BatchFailure::Invocation { code, message } => {
                        tracing::warn!(code, batch_size = batch.len(), "Batch inference failed: {message}");
                    }
                    BatchFailure::ShapeMismatch { .. } => {
                        tracing::error!(batch_size = batch.len(), "{failure}");
                    }
                }
                self.metrics.record_batch_failure();
                self.metrics.record_completed(batch.len());
                Err(failure)
            }
        }
    }

    fn discard(&self, session: &mut Session, failure: &BatchFailure) {
        tracing::debug!(session = %session.id(), "discarding session admitted during a failed batch");
        abort_batch(std::slice::from_mut(session), failure);
        self.metrics.record_completed(1);
    }

    fn abandon(&self, session: &mut Session) {
        let status = ResultStatus::new(503, SCHEDULER_STOPPED_MESSAGE);
        let payload = error_payload(&status);
        let aborted = session.abort(status, payload);
        if aborted {
            self.metrics.record_completed(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_backend::{fragment, ScriptedBackend};
    use crate::core::Completion;
    use crate::session::{Request, ResponseStream};

    fn handler(backend: ScriptedBackend, timeout: Duration) -> RollingBatchHandler<ScriptedBackend> {
        RollingBatchHandler {
            backend,
            timeout,
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    fn session() -> (Session, ResponseStream) {
        Session::new(Request::new("{\"inputs\":\"hi\"}"), "7".to_string(), None)
    }

    #[tokio::test]
    async fn test_forward_passes_output_through() {
        let handler = handler(
            ScriptedBackend::new(|_, _| Ok(BackendOutput::success(vec![fragment(true, "x")]))),
            Duration::from_secs(1),
        );
        let (s, _stream) = session();
        let batch = handler.make_batch_input(&[s], false);

        let output = handler.forward(batch, CancellationToken::new()).await;

        assert!(output.is_success());
        assert_eq!(output.content.len(), 1);
        assert_eq!(handler.metrics.snapshot().batches_dispatched, 1);
        assert_eq!(handler.metrics.snapshot().max_batch_size, 1);
    }

    #[tokio::test]
    async fn test_backend_errors_become_failed_outputs() {
        let handler = handler(
            ScriptedBackend::new(|_, _| Err(BackendError::Unavailable("connection refused".into()))),
            Duration::from_secs(1),
        );

        let output = handler.forward(BatchInput::new(), CancellationToken::new()).await;

        assert_eq!(output.code, 503);
        assert!(output.message.contains("connection refused"));
        assert!(output.content.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_becomes_timeout_output() {
        // Never released, so the call can only end through the deadline
        let handler = handler(
            ScriptedBackend::gated(|_, _| Ok(BackendOutput::success(vec![]))),
            Duration::from_secs(5),
        );

        let output = handler.forward(BatchInput::new(), CancellationToken::new()).await;

        assert_eq!(output.code, 408);
    }

    #[tokio::test]
    async fn test_failed_batch_is_counted() {
        let handler = handler(ScriptedBackend::new(|_, _| unreachable!()), Duration::from_secs(1));
        let (a, _sa) = session();
        let (b, _sb) = session();
        let mut batch = vec![a, b];

        let result = handler.handle_outputs(&mut batch, BackendOutput::error(500, "boom"));

        assert!(result.is_err());
        assert!(batch.iter().all(|s| s.is_completed()));
        let snapshot = handler.metrics.snapshot();
        assert_eq!(snapshot.batch_failures, 1);
        assert_eq!(snapshot.sessions_completed, 2);
    }

    #[tokio::test]
    async fn test_discard_uses_batch_failure_result() {
        let handler = handler(ScriptedBackend::new(|_, _| unreachable!()), Duration::from_secs(1));
        let (mut s, stream) = session();

        handler.discard(&mut s, &BatchFailure::Invocation { code: 503, message: "overloaded".into() });

        assert!(s.is_completed());
        let (body, status) = stream.collect_body().await;
        assert_eq!(status, ResultStatus::new(503, "Batch inference failed"));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, serde_json::json!({ "code": 503, "message": "Batch inference failed" }));
        assert_eq!(handler.metrics.snapshot().sessions_completed, 1);
    }

    #[tokio::test]
    async fn test_abandon_reports_stopped_scheduler() {
        let handler = handler(ScriptedBackend::new(|_, _| unreachable!()), Duration::from_secs(1));
        let (mut s, stream) = session();

        handler.abandon(&mut s);
        // A second abandon is a no-op
        handler.abandon(&mut s);

        let (body, status) = stream.collect_body().await;
        assert_eq!(status, ResultStatus::new(503, SCHEDULER_STOPPED_MESSAGE));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 503);
        assert_eq!(handler.metrics.snapshot().sessions_completed, 1);
    }
}
