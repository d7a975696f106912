//! Engine error types.

use thiserror::Error;

/// Errors surfaced by engine lifecycle calls.
///
/// Command failures never appear here: they are reported through each
/// command's [`Completion`](rewind_core::Completion).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread panicked.
    #[error("engine worker panicked")]
    WorkerPanicked,
}

/// Result type for engine lifecycle calls.
pub type EngineResult<T> = Result<T, EngineError>;
