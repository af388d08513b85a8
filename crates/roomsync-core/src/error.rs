//! Engine error taxonomy.
//!
//! Errors reach the UI by two routes. Precondition failures of an intent
//! (`NotAuthenticated`, `NoRoomSelected`, `InvalidRecord`) are returned to
//! the caller before any store operation is issued. Everything that fails after a suspension point
//! (write acknowledgement, fetch, sign-in) is recorded as the snapshot's
//! `last_error` instead, followed by a notification.

use roomsync_proto::{AuthError, RoomId, SchemaError, StoreError, StorePath};
use thiserror::Error;

/// Errors surfaced by the synchronization engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A write was attempted without a signed-in identity.
    #[error("not signed in")]
    NotAuthenticated,

    /// A message was sent with no room selected.
    #[error("no room selected")]
    NoRoomSelected,

    /// An intent argument would produce a record that fails its schema.
    #[error("rejected input: {0}")]
    InvalidRecord(#[from] SchemaError),

    /// A room the engine just wrote was not in the registry when the write
    /// was acknowledged.
    #[error("room {room_id} not found")]
    RoomNotFound {
        /// Remote key of the missing room
        room_id: RoomId,
    },

    /// A membership or nickname fetch was rejected by the store.
    #[error("failed to resolve {path}: {source}")]
    ResolutionFailed {
        /// Path that was fetched
        path: StorePath,
        /// Store failure
        source: StoreError,
    },

    /// The store rejected a write.
    #[error("write to {path} failed: {source}")]
    StoreWriteFailed {
        /// Path that was written
        path: StorePath,
        /// Store failure
        source: StoreError,
    },

    /// Interactive sign-in or sign-out failed.
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] AuthError),
}

impl SyncError {
    /// Returns true for errors raised directly to the caller of an intent.
    ///
    /// All other kinds only ever appear as `last_error`.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::NoRoomSelected | Self::InvalidRecord(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_synchronous() {
        assert!(SyncError::NotAuthenticated.is_synchronous());
        assert!(SyncError::NoRoomSelected.is_synchronous());
        assert!(
            SyncError::from(SchemaError::Invalid { record: "room", reason: "blank".into() })
                .is_synchronous()
        );
        assert!(!SyncError::RoomNotFound { room_id: "r1".into() }.is_synchronous());
    }

    #[test]
    fn messages_name_the_path() {
        let err = SyncError::StoreWriteFailed {
            path: StorePath::new("rooms/r1"),
            source: StoreError::PermissionDenied { path: StorePath::new("rooms/r1") },
        };
        assert_eq!(err.to_string(), "write to /rooms/r1 failed: permission denied at /rooms/r1");
    }
}
