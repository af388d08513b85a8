//! Known rooms and the current selection.
//!
//! The registry mirrors the remote rooms collection. Child notifications may
//! be delivered more than once; insertion and removal are idempotent per room
//! id. The selection always names a room in the registry: removing the
//! selected room clears it.

use roomsync_proto::{RoomId, RoomRecord};

use crate::{MembershipTracker, MessageLog, RoomView};

/// Local state of one room.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    name: String,
    /// The signed-in account's membership here.
    pub membership: MembershipTracker,
    /// Message history.
    pub log: MessageLog,
}

impl Room {
    /// Create a room from its remote record.
    pub fn new(id: impl Into<RoomId>, record: RoomRecord) -> Self {
        Self {
            id: id.into(),
            name: record.name,
            membership: MembershipTracker::new(),
            log: MessageLog::new(),
        }
    }

    /// Remote key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observable copy, with `unknown_nickname` standing in for an
    /// unresolved membership.
    pub fn view(&self, unknown_nickname: &str) -> RoomView {
        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.membership.role(),
            nickname: self.membership.nickname().unwrap_or(unknown_nickname).to_string(),
            messages: self.log.messages().to_vec(),
        }
    }
}

/// Rooms in arrival order plus the selection.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
    selected: Option<RoomId>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a room unless one with this id exists.
    ///
    /// Returns `false` for a repeated delivery.
    pub fn on_room_added(&mut self, id: &str, record: RoomRecord) -> bool {
        if self.contains(id) {
            return false;
        }
        self.rooms.push(Room::new(id, record));
        true
    }

    /// Remove a room, clearing the selection if it was selected.
    ///
    /// Returns `false` if the id is unknown.
    pub fn on_room_removed(&mut self, id: &str) -> bool {
        let Some(index) = self.rooms.iter().position(|room| room.id == id) else {
            return false;
        };
        self.rooms.remove(index);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        true
    }

    /// Room with the given id.
    pub fn find_by_id(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == id)
    }

    /// Mutable room with the given id.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|room| room.id == id)
    }

    /// Whether a room with this id is known.
    pub fn contains(&self, id: &str) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Select a room.
    ///
    /// Returns `false` without changing anything if the room is unknown or
    /// already selected. The caller performs the follow-up work (membership
    /// and message sync) only when this returns `true`.
    pub fn select(&mut self, id: &str) -> bool {
        if self.selected.as_deref() == Some(id) || !self.contains(id) {
            return false;
        }
        self.selected = Some(id.to_string());
        true
    }

    /// Selected room id.
    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Selected room.
    pub fn selected(&self) -> Option<&Room> {
        self.selected.as_deref().and_then(|id| self.find_by_id(id))
    }

    /// Rooms in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    /// Mutable rooms in arrival order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.iter_mut()
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is known.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> RoomRecord {
        RoomRecord::new(name)
    }

    #[test]
    fn duplicate_add_keeps_one_room() {
        let mut registry = RoomRegistry::new();
        assert!(registry.on_room_added("r1", record("general")));
        assert!(!registry.on_room_added("r1", record("renamed")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_id("r1").map(Room::name), Some("general"));
    }

    #[test]
    fn removing_selected_room_clears_selection() {
        let mut registry = RoomRegistry::new();
        registry.on_room_added("r1", record("general"));
        registry.on_room_added("r2", record("random"));
        assert!(registry.select("r1"));

        assert!(registry.on_room_removed("r1"));
        assert_eq!(registry.selected_id(), None);
        assert!(!registry.on_room_removed("r1"));
    }

    #[test]
    fn removing_other_room_keeps_selection() {
        let mut registry = RoomRegistry::new();
        registry.on_room_added("r1", record("general"));
        registry.on_room_added("r2", record("random"));
        registry.select("r1");
        registry.on_room_removed("r2");
        assert_eq!(registry.selected_id(), Some("r1"));
    }

    #[test]
    fn select_is_noop_for_unknown_or_current() {
        let mut registry = RoomRegistry::new();
        registry.on_room_added("r1", record("general"));
        assert!(!registry.select("missing"));
        assert!(registry.select("r1"));
        assert!(!registry.select("r1"));
    }

    #[test]
    fn rooms_keep_arrival_order() {
        let mut registry = RoomRegistry::new();
        for (id, name) in [("b", "second"), ("a", "first"), ("c", "third")] {
            registry.on_room_added(id, record(name));
        }
        let ids: Vec<&str> = registry.iter().map(Room::id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn view_uses_placeholder_for_unknown_membership() {
        let room = Room::new("r1", record("general"));
        let view = room.view("unknown");
        assert_eq!(view.nickname, "unknown");
        assert_eq!(view.role, roomsync_proto::Role::Unset);
    }
}
