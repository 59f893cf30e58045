use safepool_core::ValidationError;
use thiserror::Error;

/// Failures of the `stress` command.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("thread {thread}: block at {offset} was overwritten while live")]
    Corruption { thread: usize, offset: usize },

    #[error("thread {thread}: pool declined its own block at {offset}")]
    FreeDeclined { thread: usize, offset: usize },

    #[error("a stress worker panicked")]
    WorkerPanicked,

    #[error("{outstanding} allocations still outstanding after all workers finished")]
    Leak { outstanding: usize },

    #[error("pool inconsistent after stress run: {0}")]
    Validation(#[from] ValidationError),
}
