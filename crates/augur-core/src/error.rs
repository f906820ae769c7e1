use thiserror::Error;

/// Top-level error type for Augur.
#[derive(Debug, Error)]
pub enum AugurError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A numeric parameter outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An observation symbol outside the model's alphabet.
    #[error("observation {symbol} at position {position} is outside the alphabet of {alphabet} symbols")]
    InvalidObservation {
        position: usize,
        symbol: usize,
        alphabet: usize,
    },

    /// Too many ensemble members failed for a chunk to be forecast.
    #[error("ensemble failed for chunk {chunk}: {failed} of {members} members failed ({reason})")]
    EnsembleFailed {
        chunk: usize,
        failed: usize,
        members: usize,
        reason: String,
    },

    /// Error from a pooled task.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single task submitted to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked while running on a worker.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped before it produced a result.
    #[error("task abandoned before completion")]
    Abandoned,

    /// The pool was shut down before the task was submitted.
    #[error("worker pool is shut down")]
    ShutDown,
}
