//! # Backend Boundary
//!
//! The scheduler treats the model server as an opaque batch-call service. This
//! module defines the wire shape of a batch ([`BatchInput`]), of its answer
//! ([`BackendOutput`]) and the [`Backend`] trait a model server adapter implements.
//!
//! ## Wire format
//!
//! For a batch of `n` slots the request carries:
//!
//! - properties `batch_{i}.{key}` copied from each session's request,
//! - content `batch_{i}.data`, the original payload on a session's first
//!   iteration and a fixed placeholder afterwards,
//! - content `batch_{i}.seed`, on a session's first iteration only,
//! - property `batch_size = n`,
//! - property `reset_rollingbatch = "true"` right after an aborted batch.
//!
//! The answer is a status code, a message and one content entry per slot.

mod core_trait;

pub use core_trait::*;

#[cfg(test)]
/// Scripted backend for tests.
///
/// Records every batch it receives and answers through a caller supplied closure.
pub(crate) mod mock_backend;
