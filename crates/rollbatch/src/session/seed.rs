use std::sync::atomic::{AtomicU64, Ordering};

/// Source of per-session sampling seeds.
///
/// The backend uses the seed so that every worker it runs samples the same
/// token for a session; it is sent once, with the session's first batch.
pub trait SeedSource: Send + Sync + 'static {
    fn next_seed(&self) -> String;
}

/// Random non-negative 31-bit seeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSeedSource;

impl SeedSource for RandomSeedSource {
    fn next_seed(&self) -> String {
        rand::random::<u32>().wrapping_shr(1).to_string()
    }
}

/// Seeds counting up from a starting value. Deterministic, for tests and replays.
#[derive(Debug, Default)]
pub struct SequentialSeedSource {
    next: AtomicU64,
}

impl SequentialSeedSource {
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl SeedSource for SequentialSeedSource {
    fn next_seed(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}
