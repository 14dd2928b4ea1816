use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::stream::{Chunk, ResponseStream};
use crate::backend::SUCCESS_CODE;
use crate::core::Completion;

/// Payload sent in place of the original request once the backend holds the
/// session's generation state.
pub const CONTINUATION_PLACEHOLDER: &[u8] = br#"{"inputs": [""]}"#;

/// A caller's request: free-form properties plus the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    properties: BTreeMap<String, String>,
    data: Bytes,
}

impl Request {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            properties: BTreeMap::new(),
            data: data.into(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Overall outcome attached to a response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultStatus {
    pub code: u16,
    pub message: String,
}

impl ResultStatus {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

impl Default for ResultStatus {
    fn default() -> Self {
        Self::new(SUCCESS_CODE, "")
    }
}

/// One request's generation lifecycle across batch iterations.
///
/// The scheduling loop is the only writer. The caller observes the session
/// through the [`ResponseStream`] returned at admission.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    request: Request,
    seed: String,

    /// Data of the most recent fragment; `Some` once the backend has seen this session.
    continuation: Option<String>,

    /// Dropped with the final chunk so the reader's stream terminates.
    sender: Option<mpsc::UnboundedSender<Chunk>>,

    status: watch::Sender<ResultStatus>,
    completed: bool,
}

impl Session {
    /// Creates a session and the stream handle its output is read from.
    pub fn new(
        request: Request,
        seed: String,
        content_type: Option<&'static str>,
    ) -> (Self, ResponseStream) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ResultStatus::default());
        let session = Self {
            id,
            request,
            seed,
            continuation: None,
            sender: Some(tx),
            status: status_tx,
            completed: false,
        };
        (session, ResponseStream::new(id, rx, status_rx, content_type))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        self.request.properties()
    }

    /// True until the backend has answered for this session once.
    pub fn is_first_iteration(&self) -> bool {
        self.continuation.is_none()
    }

    /// Body to send in the next batch.
    pub fn payload(&self) -> Bytes {
        if self.is_first_iteration() {
            self.request.data().clone()
        } else {
            Bytes::from_static(CONTINUATION_PLACEHOLDER)
        }
    }

    /// Seed to send in the next batch; only present on the first iteration.
    pub fn seed(&self) -> Option<&str> {
        if self.is_first_iteration() {
            Some(&self.seed)
        } else {
            None
        }
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn status(&self) -> ResultStatus {
        self.status.borrow().clone()
    }

    pub fn set_status(&self, status: ResultStatus) {
        self.status.send_replace(status);
    }

    /// Records one answer from the backend and forwards it to the reader.
    pub fn record_fragment(&mut self, data: String, last: bool) -> bool {
        let chunk = Bytes::from(data.clone());
        self.continuation = Some(data);
        self.append(chunk, last)
    }

    /// Appends a chunk to the stream.
    ///
    /// Returns `false` without appending if the final chunk was already sent.
    pub fn append(&mut self, data: Bytes, last: bool) -> bool {
        if self.completed {
            tracing::warn!(session = %self.id, "dropping chunk appended after the final chunk");
            return false;
        }

        if let Some(sender) = &self.sender {
            if sender.send(Chunk { data, last }).is_err() {
                tracing::debug!(session = %self.id, "response stream dropped by reader");
            }
        }

        if last {
            self.completed = true;
            self.sender = None;
        }
        true
    }

    /// Ends the session with an error result and a final error chunk.
    pub fn abort(&mut self, status: ResultStatus, payload: Bytes) -> bool {
        if self.completed {
            return false;
        }
        self.set_status(status);
        self.append(payload, true)
    }
}

impl Completion for Session {
    fn is_completed(&self) -> bool {
        self.completed
    }
}
