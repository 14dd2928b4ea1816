//! Routing a batched backend answer back onto the sessions that produced it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::backend::BackendOutput;
use crate::core::Completion;
use crate::error::BatchFailure;
use crate::session::{ResultStatus, Session};

/// Message attached to every session of an aborted batch.
pub const BATCH_FAILED_MESSAGE: &str = "Batch inference failed";

/// Message attached to a session whose slot answer could not be decoded.
pub const MALFORMED_SLOT_MESSAGE: &str = "Malformed slot output";

/// One slot's answer: a piece of output and whether it is the last.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Fragment {
    pub last: bool,
    pub data: String,
}

/// Application-level failure a backend may report inside a fragment's `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub error: String,
}

impl ErrorEnvelope {
    /// Reads `data` as an error envelope.
    ///
    /// Most fragments carry ordinary generated text, so failing to parse is the
    /// common case and simply yields `None`.
    pub fn try_parse(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

impl From<ErrorEnvelope> for ResultStatus {
    fn from(envelope: ErrorEnvelope) -> Self {
        ResultStatus::new(envelope.code, envelope.error)
    }
}

/// What happened to the sessions of one successful batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxReport {
    /// Sessions that received their final chunk
    pub completed: usize,

    /// Slots whose data was an error envelope
    pub application_errors: usize,

    /// Slots whose answer was not a fragment
    pub malformed: usize,
}

/// JSON body of a synthesized error chunk: the status itself.
pub fn error_payload(status: &ResultStatus) -> Bytes {
    match serde_json::to_vec(status) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            tracing::warn!("failed to encode error payload: {err}");
            Bytes::from(status.message.clone())
        }
    }
}

/// Rejects outputs that cannot be routed slot-by-slot.
pub fn check_output(output: &BackendOutput, expected: usize) -> Result<(), BatchFailure> {
    if !output.is_success() {
        return Err(BatchFailure::Invocation {
            code: output.code,
            message: output.message.clone(),
        });
    }
    if output.content.len() != expected {
        return Err(BatchFailure::ShapeMismatch {
            expected,
            actual: output.content.len(),
        });
    }
    Ok(())
}

/// Applies `output` to `sessions`, slot `i` to session `i`.
///
/// A failed or misshapen output aborts every session with the same error
/// result; no slot gets partial credit since the slot-to-session mapping is
/// no longer trustworthy.
pub fn demultiplex(sessions: &mut [Session], output: BackendOutput) -> Result<DemuxReport, BatchFailure> {
    if let Err(failure) = check_output(&output, sessions.len()) {
        abort_batch(sessions, &failure);
        return Err(failure);
    }

    let mut report = DemuxReport::default();
    for (session, content) in sessions.iter_mut().zip(output.content) {
        apply_slot(session, &content, &mut report);
    }
    Ok(report)
}

/// Completes every session with the failure's error result.
pub fn abort_batch(sessions: &mut [Session], failure: &BatchFailure) {
    let status = ResultStatus::new(failure.code(), BATCH_FAILED_MESSAGE);
    let payload = error_payload(&status);
    for session in sessions.iter_mut() {
        session.abort(status.clone(), payload.clone());
    }
}

fn apply_slot(session: &mut Session, content: &Bytes, report: &mut DemuxReport) {
    match serde_json::from_slice::<Fragment>(content) {
        Ok(fragment) => {
            if let Some(envelope) = ErrorEnvelope::try_parse(&fragment.data) {
                tracing::debug!(session = %session.id(), code = envelope.code, "slot reported an application error");
                session.set_status(envelope.into());
                report.application_errors += 1;
            }
            session.record_fragment(fragment.data, fragment.last);
        }
        Err(err) => {
            tracing::warn!(session = %session.id(), "malformed slot output: {err}");
            let status = ResultStatus::new(500, MALFORMED_SLOT_MESSAGE);
            let payload = error_payload(&status);
            session.abort(status, payload);
            report.malformed += 1;
        }
    }

    if session.is_completed() {
        report.completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_backend::fragment;
    use crate::session::{Request, ResponseStream};
    use futures::StreamExt;

    fn sessions(count: usize) -> (Vec<Session>, Vec<ResponseStream>) {
        (0..count)
            .map(|i| Session::new(Request::new("x"), i.to_string(), None))
            .unzip()
    }

    #[test]
    fn test_error_envelope_parse_is_lenient() {
        assert_eq!(
            ErrorEnvelope::try_parse(r#"{"code": 424, "error": "prompt too long"}"#),
            Some(ErrorEnvelope { code: 424, error: "prompt too long".into() })
        );
        assert_eq!(ErrorEnvelope::try_parse("hello"), None);
        assert_eq!(ErrorEnvelope::try_parse("424"), None);
        assert_eq!(ErrorEnvelope::try_parse(r#"{"generated_text": "hi"}"#), None);
        assert_eq!(ErrorEnvelope::try_parse(""), None);
    }

    #[test]
    fn test_error_payload_is_the_status() {
        let payload = error_payload(&ResultStatus::new(503, "Rolling batch scheduler stopped"));
        assert_eq!(
            payload,
            Bytes::from_static(br#"{"code":503,"message":"Rolling batch scheduler stopped"}"#)
        );
    }

    #[tokio::test]
    async fn test_routes_slots_in_order() {
        let (mut batch, mut streams) = sessions(2);
        let output = BackendOutput::success(vec![fragment(false, "foo"), fragment(true, "bar")]);

        let report = demultiplex(&mut batch, output).unwrap();

        assert_eq!(report, DemuxReport { completed: 1, application_errors: 0, malformed: 0 });
        assert!(!batch[0].is_completed());
        assert!(batch[1].is_completed());
        assert_eq!(batch[0].continuation(), Some("foo"));

        let a = streams[0].next().await.unwrap();
        assert_eq!((a.data.as_ref(), a.last), (b"foo".as_ref(), false));
        let b = streams[1].next().await.unwrap();
        assert_eq!((b.data.as_ref(), b.last), (b"bar".as_ref(), true));
        assert!(streams[1].next().await.is_none());
        assert!(streams[1].status().is_success());
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_every_session() {
        let (mut batch, streams) = sessions(2);

        let failure = demultiplex(&mut batch, BackendOutput::error(500, "worker died")).unwrap_err();
        assert_eq!(failure, BatchFailure::Invocation { code: 500, message: "worker died".into() });

        assert!(batch.iter().all(|s| s.is_completed()));
        for stream in streams {
            let (body, status) = stream.collect_body().await;
            assert_eq!(status, ResultStatus::new(500, BATCH_FAILED_MESSAGE));
            let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body, serde_json::json!({ "code": 500, "message": "Batch inference failed" }));
        }
    }

    #[tokio::test]
    async fn test_shape_mismatch_aborts_every_session() {
        let (mut batch, streams) = sessions(3);
        let output = BackendOutput::success(vec![fragment(false, "a"), fragment(false, "b")]);

        let failure = demultiplex(&mut batch, output).unwrap_err();
        assert_eq!(failure, BatchFailure::ShapeMismatch { expected: 3, actual: 2 });

        for stream in streams {
            let (_, status) = stream.collect_body().await;
            assert_eq!(status.code, 500);
        }
    }

    #[tokio::test]
    async fn test_application_error_only_touches_its_slot() {
        let (mut batch, streams) = sessions(2);
        let envelope = r#"{"code": 424, "error": "prompt too long"}"#;
        let output = BackendOutput::success(vec![fragment(true, envelope), fragment(false, "tok")]);

        let report = demultiplex(&mut batch, output).unwrap();
        assert_eq!(report.application_errors, 1);
        assert_eq!(report.completed, 1);
        assert!(!batch[1].is_completed());

        let mut streams = streams.into_iter();
        let (body, status) = streams.next().unwrap().collect_body().await;
        assert_eq!(body, envelope.as_bytes());
        assert_eq!(status, ResultStatus::new(424, "prompt too long"));

        assert!(batch[1].status().is_success());
    }

    #[tokio::test]
    async fn test_malformed_slot_fails_only_that_session() {
        let (mut batch, _streams) = sessions(2);
        let output = BackendOutput::success(vec![Bytes::from_static(b"not json"), fragment(false, "tok")]);

        let report = demultiplex(&mut batch, output).unwrap();

        assert_eq!(report.malformed, 1);
        assert!(batch[0].is_completed());
        assert_eq!(batch[0].status(), ResultStatus::new(500, MALFORMED_SLOT_MESSAGE));
        assert!(!batch[1].is_completed());
    }
}
