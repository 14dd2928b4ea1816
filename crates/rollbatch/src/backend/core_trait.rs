use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;

/// Status code of a successful backend call.
pub const SUCCESS_CODE: u16 = 200;

/// Property carrying the number of slots in a batch.
pub const BATCH_SIZE_PROPERTY: &str = "batch_size";

/// Property telling the backend to drop continuation state from the previous batch.
pub const RESET_PROPERTY: &str = "reset_rollingbatch";

/// One batch call as the backend sees it: a flat set of string properties
/// plus ordered binary content, both keyed by name.
///
/// Per-slot entries are namespaced as `batch_{i}.{name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInput {
    properties: BTreeMap<String, String>,
    content: Vec<(String, Bytes)>,
}

impl BatchInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Appends a named content entry, keeping insertion order.
    pub fn add(&mut self, key: impl Into<String>, value: Bytes) {
        self.content.push((key.into(), value));
    }

    /// First content entry with the given name.
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.content
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn content(&self) -> &[(String, Bytes)] {
        &self.content
    }

    /// Slot count declared by the `batch_size` property, if present and numeric.
    pub fn batch_size(&self) -> Option<usize> {
        self.property(BATCH_SIZE_PROPERTY)?.parse().ok()
    }

    /// Whether this batch carries the reset marker.
    pub fn is_reset(&self) -> bool {
        self.property(RESET_PROPERTY) == Some("true")
    }
}

/// What the backend returns for one batch call.
///
/// On success `content` holds exactly one entry per slot, in slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub code: u16,
    pub message: String,
    pub content: Vec<Bytes>,
}

impl BackendOutput {
    pub fn success(content: Vec<Bytes>) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: String::new(),
            content,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            content: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

impl From<BackendError> for BackendOutput {
    fn from(err: BackendError) -> Self {
        BackendOutput::error(err.status_code(), err.to_string())
    }
}

/// The inference service the scheduler drives.
///
/// Exactly one call is in flight per scheduler at any time. Implementations
/// should honour `timeout` and may watch `cancel` to abort early when the
/// scheduler shuts down; the scheduler additionally drops the returned future
/// on shutdown, so cancellation is best-effort from the backend's point of view.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Runs one batch and returns the per-slot outputs.
    async fn invoke(
        &self,
        batch: BatchInput,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<BackendOutput, BackendError>;
}
