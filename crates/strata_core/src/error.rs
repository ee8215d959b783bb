//! Error types for the engine.

use thiserror::Error;

/// Result type for engine operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Errors surfaced by the engine and the modalities on top of it.
///
/// Every bulk operation reports through one error slot; a batch that fails
/// part-way leaves its arena outputs indeterminate. The only error a caller
/// should handle by retrying is [`StrataError::TransactionConflict`].
#[derive(Debug, Error)]
pub enum StrataError {
    /// The database handle was null or already closed.
    #[error("database is not initialized")]
    Uninitialized,

    /// Malformed input arguments.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// Arena or backend allocation was exhausted.
    #[error("out of memory")]
    OutOfMemory,

    /// An unsupported format or opcode was requested.
    #[error("missing feature: {message}")]
    MissingFeature {
        /// Description of the unsupported request.
        message: String,
    },

    /// Commit-time validation failed; the caller must retry.
    #[error("transaction conflict")]
    TransactionConflict,

    /// A named collection does not exist.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// The name that failed to resolve.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Opaque error relayed from the storage backend.
    #[error("backend error: {0}")]
    Backend(#[from] strata_storage::StorageError),

    /// Document parsing or serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),
}

impl StrataError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a missing feature error.
    pub fn missing_feature(message: impl Into<String>) -> Self {
        Self::MissingFeature {
            message: message.into(),
        }
    }

    /// Creates an unknown collection error.
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Whether the caller should retry the whole operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(StrataError::TransactionConflict.is_retryable());
        assert!(!StrataError::Uninitialized.is_retryable());
        assert!(!StrataError::invalid_argument("x").is_retryable());
    }

    #[test]
    fn backend_errors_wrap() {
        let err: StrataError = strata_storage::StorageError::corrupted("boom").into();
        assert!(matches!(err, StrataError::Backend(_)));
    }
}
