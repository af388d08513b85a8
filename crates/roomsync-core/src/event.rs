//! Engine events and actions.
//!
//! The engine never performs I/O. Store and auth operations leave the engine
//! as [`EngineAction`]s tagged with a [`RequestId`]; their outcomes come back
//! as [`EngineEvent`]s carrying the same id.

use std::fmt;

use roomsync_proto::{AuthError, Identity, StoreError, StorePath};
use serde_json::Value;

/// Correlates an issued operation with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Child notifications a collection subscription can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildEventKind {
    /// A direct child appeared.
    Added,
    /// A direct child disappeared.
    Removed,
}

/// Inputs the caller feeds into the engine.
///
/// The caller is responsible for:
/// - Delivering child notifications for every subscription the engine opened
/// - Reporting the outcome of every issued store and auth operation
/// - Forwarding the auth collaborator's identity stream
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A child appeared under a subscribed collection.
    ChildAdded {
        /// Subscribed collection path.
        collection: StorePath,
        /// Key of the new child.
        key: String,
        /// Document stored at the child.
        value: Value,
    },

    /// A child disappeared from a subscribed collection.
    ChildRemoved {
        /// Subscribed collection path.
        collection: StorePath,
        /// Key of the removed child.
        key: String,
    },

    /// A `set` was acknowledged or rejected.
    SetCompleted {
        /// Request that issued the write.
        request: RequestId,
        /// Store outcome.
        result: Result<(), StoreError>,
    },

    /// A `push` was acknowledged with the new child key, or rejected.
    PushCompleted {
        /// Request that issued the push.
        request: RequestId,
        /// Key assigned by the store.
        result: Result<String, StoreError>,
    },

    /// A one-shot fetch returned. `Ok(None)` when nothing is stored there.
    FetchCompleted {
        /// Request that issued the fetch.
        request: RequestId,
        /// Document at the fetched path.
        result: Result<Option<Value>, StoreError>,
    },

    /// The auth collaborator reported a new identity, or sign-out.
    IdentityChanged(Option<Identity>),

    /// An interactive sign-in or sign-out finished.
    AuthCompleted {
        /// Request that started the flow.
        request: RequestId,
        /// Provider outcome.
        result: Result<(), AuthError>,
    },
}

/// Actions the engine produces for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Open a child subscription on a collection.
    ///
    /// A subscription for [`ChildEventKind::Added`] first delivers every
    /// existing child, in key order.
    Subscribe {
        /// Collection to watch.
        collection: StorePath,
        /// Notification kind.
        kind: ChildEventKind,
    },

    /// Write or (with `None`) remove the document at a path.
    Set {
        /// Request id reported back in [`EngineEvent::SetCompleted`].
        request: RequestId,
        /// Target path.
        path: StorePath,
        /// New document, or `None` to remove.
        value: Option<Value>,
    },

    /// Create a child with a store-assigned, key-ascending id.
    Push {
        /// Request id reported back in [`EngineEvent::PushCompleted`].
        request: RequestId,
        /// Collection receiving the child.
        collection: StorePath,
        /// Initial document of the child.
        value: Value,
    },

    /// Read the document at a path once.
    Fetch {
        /// Request id reported back in [`EngineEvent::FetchCompleted`].
        request: RequestId,
        /// Path to read.
        path: StorePath,
    },

    /// Start interactive sign-in.
    SignIn {
        /// Request id reported back in [`EngineEvent::AuthCompleted`].
        request: RequestId,
    },

    /// Sign the current account out.
    SignOut {
        /// Request id reported back in [`EngineEvent::AuthCompleted`].
        request: RequestId,
    },

    /// Call [`crate::SyncEngine::flush`] once the current input's synchronous
    /// work has drained.
    ///
    /// Emitted at most once per pending notification.
    ScheduleFlush,
}
