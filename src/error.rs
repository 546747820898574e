//! Error types for wordtally
//!
//! Expected load outcomes (missing file, permission denied, cancellation) are
//! reported as [`LoadStatus`](crate::types::LoadStatus) values, not errors.
//! This module covers everything else: invalid configuration, I/O faults in
//! the middle of a read, worker panics and cooperative cancellation of a
//! count.

use crate::types::Stage;
use thiserror::Error;

/// Result type alias for wordtally operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wordtally
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "reader.chunk_size_bytes")
        key: Option<String>,
    },

    /// I/O error raised after the load preconditions passed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation observed its cancellation token and stopped
    #[error("operation cancelled")]
    Cancelled,

    /// A worker thread panicked; its siblings were joined before this was reported
    #[error("{stage} worker panicked: {message}")]
    WorkerPanicked {
        /// Stage the worker belonged to
        stage: Stage,
        /// Panic payload, when it was a string
        message: String,
    },

    /// Shutdown in progress - not accepting new operations
    #[error("shutdown in progress: not accepting new operations")]
    ShuttingDown,
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Build a [`Error::WorkerPanicked`] from a `JoinHandle`/`thread::join` payload
    pub(crate) fn from_panic(stage: Stage, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::WorkerPanicked { stage, message }
    }

    /// Whether this error is the cooperative-cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
