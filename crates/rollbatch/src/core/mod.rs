//! # Core Scheduling Machinery
//!
//! Domain-agnostic pieces of the rolling batch scheduler.
//!
//! ## Module Structure
//!
//! * [`active_set`] - The bounded, ordered set of in-flight items with its two
//!   wait queues (`capacity_available`, `work_available`). Producers enqueue
//!   here; the loop snapshots and settles here.
//!
//! * [`handler`] - The `BatchHandler` trait: how items become a batch, how the
//!   batch is run, and how its answer is routed back.
//!
//! * [`batch`] - The scheduling loop itself.
//!
//! * [`worker`] - Spawning and cooperative shutdown of the loop's task.
//!
pub mod active_set;
pub mod batch;
pub mod handler;
pub mod worker;

mod guard;
mod state;

pub use active_set::{ActiveSet, ActiveState, Completion};
pub(crate) use guard::LoopGuard;
pub use handler::BatchHandler;
pub use state::LoopState;
