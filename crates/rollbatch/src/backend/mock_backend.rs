use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendOutput, BatchInput};
use crate::error::BackendError;

type Responder = Box<dyn Fn(usize, &BatchInput) -> Result<BackendOutput, BackendError> + Send + Sync>;

// Answers each call through `responder(call_index, batch)`.
// A gated backend holds every call until a permit is added to its gate.
pub(crate) struct ScriptedBackend {
    responder: Responder,
    calls: Arc<Mutex<Vec<BatchInput>>>,
    gate: Arc<Semaphore>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where F: Fn(usize, &BatchInput) -> Result<BackendOutput, BackendError> + Send + Sync + 'static
    {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(vec![])),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    pub fn gated<F>(responder: F) -> Self
    where F: Fn(usize, &BatchInput) -> Result<BackendOutput, BackendError> + Send + Sync + 'static
    {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::new(responder)
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<BatchInput>>> {
        self.calls.clone()
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        self.gate.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn invoke(
        &self,
        batch: BatchInput,
        _timeout: Duration,
        _cancel: CancellationToken,
    ) -> Result<BackendOutput, BackendError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(batch.clone());
            calls.len() - 1
        };
        let permit = self.gate.acquire().await.map_err(|_| BackendError::Cancelled)?;
        permit.forget();
        (self.responder)(call, &batch)
    }
}

/// Encodes one slot answer the way a model server does.
pub(crate) fn fragment(last: bool, data: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "last": last, "data": data }).to_string())
}

/// Values of the per-slot `name` property, in slot order.
pub(crate) fn slot_names(batch: &BatchInput) -> Vec<String> {
    (0..batch.batch_size().unwrap_or(0))
        .map(|i| {
            batch
                .property(&format!("batch_{i}.name"))
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}
