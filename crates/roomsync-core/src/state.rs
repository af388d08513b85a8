//! Observable application state.
//!
//! These are the values handed to the observer. They are plain owned copies
//! of engine state taken at flush time: holding one never aliases the
//! engine's internal caches, and later engine updates arrive as a new
//! snapshot.

use roomsync_proto::{Identity, MessageId, Role, RoomId, UserId};

use crate::SyncError;

/// A message in a room's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Remote key of the message.
    pub id: MessageId,
    /// Account id of the author.
    pub author_id: UserId,
    /// Author nickname once resolved, the raw author id until then.
    pub author_display: String,
    /// Server-assigned write time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Message text.
    pub body: String,
    resolved: bool,
}

impl Message {
    /// Create a message showing its raw author id.
    pub fn new(
        id: impl Into<MessageId>,
        author_id: impl Into<UserId>,
        timestamp: u64,
        body: impl Into<String>,
    ) -> Self {
        let author_id = author_id.into();
        Self {
            id: id.into(),
            author_display: author_id.clone(),
            author_id,
            timestamp,
            body: body.into(),
            resolved: false,
        }
    }

    /// Whether `author_display` holds the resolved nickname.
    pub fn is_author_resolved(&self) -> bool {
        self.resolved
    }

    /// Replace the raw author id with the resolved nickname.
    ///
    /// Write-once: returns `false` and leaves the message untouched if it was
    /// already resolved.
    pub(crate) fn resolve_author(&mut self, nickname: &str) -> bool {
        if self.resolved {
            return false;
        }
        self.author_display = nickname.to_string();
        self.resolved = true;
        true
    }
}

/// Observable state of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    /// Remote key of the room.
    pub id: RoomId,
    /// Display name from the room record.
    pub name: String,
    /// The signed-in account's role here. [`Role::Unset`] while unresolved.
    pub role: Role,
    /// The signed-in account's nickname here.
    pub nickname: String,
    /// Messages in arrival order.
    pub messages: Vec<Message>,
}

/// Snapshot handed to the observer on every notification.
///
/// # Invariants
///
/// - `selected_room`, if set, names an element of `rooms`
/// - room ids in `rooms` are unique
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSnapshot {
    /// Signed-in account. `None` when signed out.
    pub identity: Option<Identity>,
    /// Account nickname used for new membership records.
    pub nickname: String,
    /// Known rooms in arrival order.
    pub rooms: Vec<RoomView>,
    /// Currently selected room. `None` if nothing is selected.
    pub selected_room: Option<RoomId>,
    /// Most recent asynchronous failure. `None` if none or dismissed.
    pub last_error: Option<SyncError>,
}

impl AppSnapshot {
    /// Room with the given id.
    pub fn room(&self, room_id: &str) -> Option<&RoomView> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    /// First room with the given display name.
    pub fn room_named(&self, name: &str) -> Option<&RoomView> {
        self.rooms.iter().find(|room| room.name == name)
    }

    /// The selected room's state. `None` if nothing is selected.
    pub fn selected(&self) -> Option<&RoomView> {
        self.selected_room.as_deref().and_then(|id| self.room(id))
    }
}
