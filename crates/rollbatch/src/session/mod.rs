//! Per-request state and the caller-facing stream handle.

mod seed;
#[allow(clippy::module_inception)]
mod session;
mod stream;

pub use seed::{RandomSeedSource, SeedSource, SequentialSeedSource};
pub use session::{Request, ResultStatus, Session, CONTINUATION_PLACEHOLDER};
pub use stream::{Chunk, ResponseStream};
