//! # Rolling Batching
//!
//! Continuous batching of streaming generation requests over a single backend.
//!
//! ## Overview
//!
//! A rolling batch keeps up to `max_rolling_batch_size` sessions in flight.
//! Every backend call advances each of them by one fragment. Sessions leave the
//! batch as soon as their last fragment arrives and waiting requests take their
//! slots on the next call, so short requests never wait for long ones to finish.
//!
//! ## Key Components
//!
//! * [`RollingBatcher`] - The caller-facing admission trait
//! * [`RollingBatchScheduler`] - Owns the active set and the scheduling loop
//! * [`assemble_batch`] - Lays sessions out as numbered backend slots
//! * [`demultiplex`] - Routes a backend answer back onto its sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use futures::StreamExt;
//! use rollbatch::backend::{Backend, BackendOutput, BatchInput};
//! use rollbatch::config::RollingBatchConfig;
//! use rollbatch::error::BackendError;
//! use rollbatch::rolling::RollingBatchScheduler;
//! use rollbatch::session::Request;
//! use tokio_util::sync::CancellationToken;
//!
//! struct OneShot;
//!
//! #[async_trait]
//! impl Backend for OneShot {
//!     async fn invoke(
//!         &self,
//!         batch: BatchInput,
//!         _timeout: Duration,
//!         _cancel: CancellationToken,
//!     ) -> Result<BackendOutput, BackendError> {
//!         let slots = batch.batch_size().unwrap_or(0);
//!         let fragment = Bytes::from_static(br#"{"last": true, "data": "hello"}"#);
//!         Ok(BackendOutput::success(vec![fragment; slots]))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = RollingBatchScheduler::new(OneShot, RollingBatchConfig::default())?;
//!
//! let mut stream = scheduler
//!     .admit(Request::new(r#"{"inputs": "hi"}"#), Duration::from_secs(5))
//!     .await?;
//!
//! while let Some(chunk) = stream.next().await {
//!     println!("{}", String::from_utf8_lossy(&chunk.data));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Handling
//!
//! A failed backend call, or one whose answer does not have exactly one entry
//! per slot, ends every session of that batch with the same error result. The
//! next call then carries `reset_rollingbatch=true` so the backend drops any
//! state it kept for the discarded sessions. Per-session application errors
//! reported inside a fragment only change that session's status.

mod assembler;
mod batcher;
mod core_trait;
mod demux;
mod handler;

pub use assembler::{assemble_batch, slot_key};
pub use batcher::RollingBatchScheduler;
pub use core_trait::*;
pub use demux::{
    abort_batch, check_output, demultiplex, error_payload, DemuxReport, ErrorEnvelope, Fragment,
    BATCH_FAILED_MESSAGE, MALFORMED_SLOT_MESSAGE,
};
pub use handler::SCHEDULER_STOPPED_MESSAGE;
