//! Echo demo for the rolling batch scheduler.
//!
//! The backend "generates" a prompt back one word per call, so prompts of
//! different lengths finish on different iterations and freed slots are taken
//! by waiting requests. Run with `RUST_LOG=debug` to watch admissions, or
//! `RUST_LOG=server_metric=info` for the batch-size metrics only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use rollbatch::backend::{Backend, BackendOutput, BatchInput};
use rollbatch::session::CONTINUATION_PLACEHOLDER;
use rollbatch::{BackendError, Request, RollingBatchConfig, RollingBatchScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROMPTS: &[&str] = &[
    "the quick brown fox",
    "hello",
    "rolling batches keep the backend busy while short prompts leave early",
    "",
    "one two three",
    "sessions join as soon as a slot frees up",
    "bye",
    "a b c d e f",
];

/// Echoes each prompt back word by word.
///
/// Mirrors the scheduler's slot order: sessions leave in place when they
/// finish and new sessions are appended at the end.
struct EchoBackend {
    step_delay: Duration,
    slots: Mutex<Vec<Vec<String>>>,
}

impl EchoBackend {
    fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            slots: Mutex::new(Vec::new()),
        }
    }

    fn prompt_words(data: &Bytes) -> Result<Vec<String>, BackendError> {
        let body: serde_json::Value = serde_json::from_slice(data)?;
        let inputs = body.get("inputs").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(inputs.split_whitespace().map(|w| format!("{w} ")).collect())
    }

    fn fragment(last: bool, data: &str) -> Bytes {
        Bytes::from(serde_json::json!({ "last": last, "data": data }).to_string())
    }

    fn step(&self, batch: &BatchInput) -> Result<BackendOutput, BackendError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if batch.is_reset() {
            slots.clear();
        }

        let size = batch.batch_size().unwrap_or(0);
        for i in slots.len()..size {
            let data = batch
                .get(&format!("batch_{i}.data"))
                .ok_or_else(|| BackendError::Unavailable(format!("slot {i} carries no data")))?;
            if data.as_ref() == CONTINUATION_PLACEHOLDER {
                return Err(BackendError::Unavailable(format!("slot {i} continues an unknown session")));
            }
            slots.push(Self::prompt_words(data)?);
        }

        let mut content = Vec::with_capacity(size);
        for words in slots.iter_mut() {
            if words.is_empty() {
                let envelope = serde_json::json!({ "code": 400, "error": "empty prompt" }).to_string();
                content.push(Self::fragment(true, &envelope));
                continue;
            }
            let word = words.remove(0);
            content.push(Self::fragment(words.is_empty(), &word));
        }

        slots.retain(|words| !words.is_empty());
        Ok(BackendOutput::success(content))
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn invoke(
        &self,
        batch: BatchInput,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<BackendOutput, BackendError> {
        tokio::select! {
            _ = tokio::time::sleep(self.step_delay) => {}
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
        }
        if self.step_delay > timeout {
            return Err(BackendError::Timeout(timeout));
        }
        self.step(&batch)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("echo_backend=info,rollbatch=info,server_metric=warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = RollingBatchConfig::from_env();
    info!(
        max_rolling_batch_size = config.max_rolling_batch_size,
        "Starting echo rolling batch demo"
    );

    let backend = EchoBackend::new(Duration::from_millis(25));
    let scheduler = Arc::new(RollingBatchScheduler::new(backend, config)?);

    let requests = PROMPTS.iter().enumerate().map(|(i, prompt)| {
        let scheduler = scheduler.clone();
        let body = serde_json::json!({ "inputs": prompt }).to_string();
        tokio::spawn(async move {
            let request = Request::new(body).with_property("request_id", i.to_string());
            let stream = scheduler.admit(request, Duration::from_secs(10)).await?;
            Ok::<_, anyhow::Error>((i, stream.collect_body().await))
        })
    });

    for result in join_all(requests).await {
        match result? {
            Ok((i, (body, status))) if status.is_success() => {
                info!(request = i, "{}", String::from_utf8_lossy(&body).trim_end());
            }
            Ok((i, (_, status))) => {
                warn!(request = i, code = status.code, "{}", status.message);
            }
            Err(err) => warn!("request failed: {err}"),
        }
    }

    let metrics = scheduler.metrics();
    info!(
        admitted = metrics.sessions_admitted,
        batches = metrics.batches_dispatched,
        max_batch_size = metrics.max_batch_size,
        "done"
    );

    scheduler.shutdown();
    Ok(())
}
