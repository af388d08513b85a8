//! Errors raised at the store and auth boundaries.

use thiserror::Error;

use crate::StorePath;

/// Failures reported by the remote store for a read or write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store's rules rejected the operation.
    #[error("permission denied at {path}")]
    PermissionDenied {
        /// Path the operation targeted
        path: StorePath,
    },

    /// Removal targeted a path that holds no data.
    #[error("nothing stored at {path}")]
    NotFound {
        /// Path the operation targeted
        path: StorePath,
    },

    /// The store could not be reached or dropped the request.
    ///
    /// Transient. The engine does not retry on its own.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Transport-level description
        reason: String,
    },
}

impl StoreError {
    /// Returns true if the failure only says the target was already empty.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failures reported by the auth collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The user dismissed the interactive sign-in.
    #[error("sign-in cancelled")]
    Cancelled,

    /// The provider refused the request.
    #[error("auth rejected: {reason}")]
    Rejected {
        /// Provider-supplied reason
        reason: String,
    },
}

/// A remote document did not match the schema for its path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The document could not be deserialized at all.
    #[error("malformed {record} document: {reason}")]
    Malformed {
        /// Record type that was expected
        record: &'static str,
        /// Deserializer message
        reason: String,
    },

    /// The document deserialized but violates a field constraint.
    #[error("invalid {record} document: {reason}")]
    Invalid {
        /// Record type that was expected
        record: &'static str,
        /// Violated constraint
        reason: String,
    },
}
