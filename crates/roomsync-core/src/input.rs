//! Runtime inputs.

use tokio::sync::oneshot;

use crate::{EngineEvent, SyncError};

/// A user intent, as queued by a UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Create a room owned by the signed-in account.
    CreateRoom {
        /// Display name.
        name: String,
    },
    /// Select a known room.
    SelectRoom {
        /// Remote key of the room.
        room_id: String,
    },
    /// Delete a room with its messages and memberships.
    DeleteRoom {
        /// Remote key of the room.
        room_id: String,
    },
    /// Change the account nickname.
    SetNickname {
        /// New nickname.
        nickname: String,
    },
    /// Post to the selected room.
    SendMessage {
        /// Message text.
        body: String,
    },
    /// Start interactive sign-in.
    SignIn,
    /// Sign out.
    SignOut,
    /// Clear the last error.
    DismissError,
}

/// Reply channel for an intent.
///
/// Precondition failures are sent as soon as the intent is processed. Sign-in
/// and sign-out reply when the auth flow completes.
pub type IntentReply = oneshot::Sender<Result<(), SyncError>>;

/// One unit of work for the [`crate::Runtime`].
#[derive(Debug)]
pub enum EngineInput {
    /// A store or auth notification.
    Event(EngineEvent),
    /// A user intent, with an optional reply channel.
    Intent {
        /// What the user asked for.
        intent: Intent,
        /// Receives the outcome. `None` to ignore it.
        reply: Option<IntentReply>,
    },
}

impl From<EngineEvent> for EngineInput {
    fn from(event: EngineEvent) -> Self {
        Self::Event(event)
    }
}

impl From<Intent> for EngineInput {
    fn from(intent: Intent) -> Self {
        Self::Intent { intent, reply: None }
    }
}
