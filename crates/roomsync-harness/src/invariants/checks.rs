//! Standard invariant checks.

use std::collections::{BTreeSet, HashSet};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// The selected room must be one of the known rooms.
pub struct SelectedRoomInRooms;

impl Invariant for SelectedRoomInRooms {
    fn name(&self) -> &'static str {
        "SelectedRoomInRooms"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(selected) = &client.state.selected_room
                && client.state.room(selected).is_none()
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: selected room {selected} not in rooms {:?}",
                        client.name,
                        client.state.rooms.iter().map(|room| &room.id).collect::<Vec<_>>()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A room id appears at most once per client.
pub struct UniqueRoomIds;

impl Invariant for UniqueRoomIds {
    fn name(&self) -> &'static str {
        "UniqueRoomIds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let mut seen = HashSet::new();
            for room in &client.state.rooms {
                if !seen.insert(&room.id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("client {}: room {} listed twice", client.name, room.id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A message id appears at most once per room.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "UniqueMessageIds"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for room in &client.state.rooms {
                let mut seen = HashSet::new();
                if let Some(duplicate) =
                    room.messages.iter().find(|message| !seen.insert(&message.id))
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} room {}: message {} listed twice",
                            client.name, room.id, duplicate.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Settled clients know the same set of rooms.
///
/// Only meaningful once every client has drained its delivery queue.
pub struct RoomSetConvergence;

impl Invariant for RoomSetConvergence {
    fn name(&self) -> &'static str {
        "RoomSetConvergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut clients = state.clients.iter();
        let Some(first) = clients.next() else {
            return Ok(());
        };
        let expected: BTreeSet<&str> = first.state.rooms.iter().map(|r| r.id.as_str()).collect();
        for client in clients {
            let actual: BTreeSet<&str> =
                client.state.rooms.iter().map(|r| r.id.as_str()).collect();
            if actual != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {} sees {actual:?}, client {} sees {expected:?}",
                        client.name, first.name
                    ),
                });
            }
        }
        Ok(())
    }
}
