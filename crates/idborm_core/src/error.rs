//! Error types for the backend.

use crate::transaction::TransactionState;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur in backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An operation was attempted before `connect()`.
    #[error("backend not connected")]
    NotConnected,

    /// A record without an id was passed to an operation that needs one.
    #[error("{operation} requires a record with a non-null id")]
    MissingPrimaryKey {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The operation is not supported by this backend.
    #[error("{operation} is not supported by the indexeddb backend")]
    Unsupported {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A value already exists in a field marked unique.
    #[error("unique constraint violated: {collection}.{field} already contains {value}")]
    UniqueViolation {
        /// The unique field.
        field: String,
        /// The conflicting value.
        value: String,
        /// The collection holding the conflicting record.
        collection: String,
    },

    /// No record exists under the given id.
    #[error("no record with id {id} in {collection}")]
    RecordNotFound {
        /// The collection searched.
        collection: String,
        /// The id that was not found.
        id: String,
    },

    /// A collection name cannot be used.
    #[error("invalid collection name '{name}': {reason}")]
    InvalidCollection {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A transaction wrapper was used after it finished.
    #[error("transaction is no longer active ({state})")]
    TransactionInactive {
        /// State the transaction finished in.
        state: TransactionState,
    },

    /// Error reported by the native object store, passed through unchanged.
    #[error(transparent)]
    Storage(#[from] idborm_storage::StorageError),

    /// A serialized record could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] idborm_codec::CodecError),
}

impl BackendError {
    /// Creates a missing primary key error.
    pub fn missing_primary_key(operation: &'static str) -> Self {
        Self::MissingPrimaryKey { operation }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Returns true if this is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}
