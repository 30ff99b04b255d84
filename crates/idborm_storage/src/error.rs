//! Error types for native store operations.

use thiserror::Error;

/// Result type for native store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a native object store.
///
/// These mirror the failure events of the browser object store and are
/// propagated unchanged through the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Attempted to open a database with a version lower than the stored one.
    #[error("version error: requested version {requested} is lower than current version {current}")]
    VersionError {
        /// The version that was requested.
        requested: u32,
        /// The version currently stored.
        current: u32,
    },

    /// A version change or deletion could not proceed because connections
    /// are still open.
    #[error("database '{name}' is blocked by {connections} open connection(s)")]
    Blocked {
        /// Name of the database.
        name: String,
        /// Number of connections still open.
        connections: usize,
    },

    /// The named object store or index does not exist.
    #[error("not found: {name}")]
    NotFound {
        /// Name of the missing object store or index.
        name: String,
    },

    /// A key or unique index constraint was violated.
    #[error("constraint error: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// A record could not be keyed or an argument was not a valid key.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid.
        message: String,
    },

    /// A write was issued in a read-only transaction.
    #[error("read-only transaction cannot write to '{store}'")]
    ReadOnly {
        /// The object store that was written.
        store: String,
    },

    /// A request was issued against a finished transaction.
    #[error("transaction is not active")]
    TransactionInactive,

    /// The transaction was aborted.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },
}

impl StorageError {
    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
