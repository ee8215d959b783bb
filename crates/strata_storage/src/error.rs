//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The commit log is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A batch was applied with a sequence that does not advance the log.
    #[error("non-monotonic commit sequence: {seq} after {last}")]
    SequenceRegression {
        /// The sequence of the rejected batch.
        seq: u64,
        /// The highest sequence already applied.
        last: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
