//! Engine configuration.

use roomsync_proto::StorePath;

/// Which remote collection a child notification belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    /// The rooms collection.
    Rooms,
    /// The message collection of one room.
    Messages(String),
}

/// Root paths of the three remote collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    /// Holds `{room}` → room record.
    pub rooms: StorePath,
    /// Holds `{room}/{user}` → membership record.
    pub members: StorePath,
    /// Holds `{room}/{message}` → message record.
    pub messages: StorePath,
}

impl Default for PathLayout {
    fn default() -> Self {
        Self {
            rooms: StorePath::new("rooms"),
            members: StorePath::new("members"),
            messages: StorePath::new("messages"),
        }
    }
}

impl PathLayout {
    /// `rooms/{room}`
    pub fn room(&self, room_id: &str) -> StorePath {
        self.rooms.child(room_id)
    }

    /// `members/{room}`
    pub fn room_members(&self, room_id: &str) -> StorePath {
        self.members.child(room_id)
    }

    /// `members/{room}/{user}`
    pub fn member(&self, room_id: &str, user_id: &str) -> StorePath {
        self.room_members(room_id).child(user_id)
    }

    /// `messages/{room}`
    pub fn room_messages(&self, room_id: &str) -> StorePath {
        self.messages.child(room_id)
    }

    /// Classify a subscribed collection path. `None` for paths the engine
    /// never subscribes to.
    pub fn classify(&self, collection: &StorePath) -> Option<Collection> {
        if *collection == self.rooms {
            return Some(Collection::Rooms);
        }
        let parent = collection.parent()?;
        if parent == self.messages {
            return collection.key().map(|room| Collection::Messages(room.to_string()));
        }
        None
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Remote path layout.
    pub layout: PathLayout,
    /// Nickname shown while a membership is unresolved or absent.
    pub unknown_nickname: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { layout: PathLayout::default(), unknown_nickname: "unknown".to_string() }
    }
}
