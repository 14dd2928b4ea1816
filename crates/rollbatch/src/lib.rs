//! # Rollbatch
//!
//! A **roll**ing **batch** scheduler for streaming inference backends.
//!
//! ## Overview
//!
//! Many concurrent generation requests share one backend. Instead of waiting
//! for a whole batch to finish before starting the next, the scheduler keeps a
//! bounded set of sessions in flight and calls the backend once per generation
//! step. Each call returns one fragment per session; finished sessions leave the
//! batch and waiting requests take their places on the following call.
//!
//! Key components include:
//!
//! - A bounded, ordered active set with admission backpressure
//! - A single scheduling loop that assembles batches and routes answers back
//! - Per-session response streams that yield fragments as they arrive
//! - A narrow [`Backend`](backend::Backend) trait for the model server
//!
//! ## Architecture
//!
//! ### Core
//!
//! [`core`] holds the domain-agnostic machinery: the [`ActiveSet`](core::ActiveSet)
//! with its `capacity_available` and `work_available` wait queues, the
//! [`BatchHandler`](core::BatchHandler) trait, and the scheduling loop that
//! drives a handler until it is stopped.
//!
//! ### Rolling Batching
//!
//! [`rolling`] specializes the core for streaming generation: its handler lays
//! sessions out as numbered backend slots, sends each session's payload and seed
//! only once, and splits the backend's answer back into per-session fragments.
//!
//! ### Assumptions
//!
//! - Exactly one backend call is in flight per scheduler.
//! - Slot `i` of a backend answer belongs to slot `i` of the batch that produced it.
//! - The backend keeps per-session generation state between calls until told
//!   to reset it.
//!
//! ## Implementation Details
//!
//! The active set's lock is never held across a backend call, so admissions and
//! stream reads proceed while the backend works. A failed call ends every
//! session of its batch and asks the backend to reset on the next call; the
//! scheduler itself keeps running.

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
pub mod rolling;
pub mod session;

pub use config::{OutputFormat, RollingBatchConfig};
pub use error::{BackendError, BatchFailure, SchedulerError};
pub use rolling::{RollingBatchScheduler, RollingBatcher};
pub use session::{Chunk, Request, ResponseStream, ResultStatus};
