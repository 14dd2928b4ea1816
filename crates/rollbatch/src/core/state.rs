use std::fmt;

/// Phase of the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Nothing to schedule; waiting for an admission or a stop signal.
    #[default]
    Idle,
    /// Building a batch and waiting on the backend.
    Batching,
    /// Routing a backend answer back onto sessions.
    Demultiplexing,
    /// Terminal. No further batches will run.
    Stopped,
}

impl LoopState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, LoopState::Stopped)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Batching => write!(f, "Batching"),
            LoopState::Demultiplexing => write!(f, "Demultiplexing"),
            LoopState::Stopped => write!(f, "Stopped"),
        }
    }
}
