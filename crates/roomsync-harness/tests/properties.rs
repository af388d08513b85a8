//! Property-based tests for the sync engine.
//!
//! Store notifications are fed straight into an engine in arbitrary order,
//! with repeats and with messages for rooms that are not (or no longer)
//! known. Invariants must hold after every event, and the visible state must
//! match a plain model of what the store said.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use roomsync_core::{EngineAction, EngineConfig, EngineEvent, SyncEngine};
use roomsync_harness::{InvariantRegistry, SystemSnapshot};
use roomsync_proto::{Identity, StorePath};
use serde_json::json;

#[derive(Debug, Clone)]
enum Step {
    RoomAdded(u8),
    RoomRemoved(u8),
    Select(u8),
    MessageAdded { room: u8, message: u8, author: u8 },
    MessageRemoved { room: u8, message: u8 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0u8..4).prop_map(Step::RoomAdded),
        1 => (0u8..4).prop_map(Step::RoomRemoved),
        2 => (0u8..4).prop_map(Step::Select),
        6 => (0u8..4, 0u8..6, 0u8..3)
            .prop_map(|(room, message, author)| Step::MessageAdded { room, message, author }),
        1 => (0u8..4, 0u8..6).prop_map(|(room, message)| Step::MessageRemoved { room, message }),
    ]
}

fn room_key(room: u8) -> String {
    format!("r{room}")
}

fn message_key(message: u8) -> String {
    format!("m{message}")
}

fn messages_of(room: u8) -> StorePath {
    StorePath::new("messages").child(&room_key(room))
}

/// Rooms and message ids the store has reported, per room.
#[derive(Default)]
struct Model {
    rooms: BTreeMap<String, BTreeSet<String>>,
}

impl Model {
    fn apply(&mut self, step: &Step) {
        match step {
            Step::RoomAdded(room) => {
                self.rooms.entry(room_key(*room)).or_default();
            },
            Step::RoomRemoved(room) => {
                self.rooms.remove(&room_key(*room));
            },
            Step::Select(_) => {},
            Step::MessageAdded { room, message, .. } => {
                if let Some(messages) = self.rooms.get_mut(&room_key(*room)) {
                    messages.insert(message_key(*message));
                }
            },
            Step::MessageRemoved { room, message } => {
                if let Some(messages) = self.rooms.get_mut(&room_key(*room)) {
                    messages.remove(&message_key(*message));
                }
            },
        }
    }
}

/// Feed one step to the engine and flush the way a runtime would.
fn drive(engine: &mut SyncEngine, step: &Step) {
    let actions = match step {
        Step::RoomAdded(room) => engine.handle(EngineEvent::ChildAdded {
            collection: StorePath::new("rooms"),
            key: room_key(*room),
            value: json!({ "name": format!("room {room}") }),
        }),
        Step::RoomRemoved(room) => engine.handle(EngineEvent::ChildRemoved {
            collection: StorePath::new("rooms"),
            key: room_key(*room),
        }),
        Step::Select(room) => engine.select_room(&room_key(*room)),
        Step::MessageAdded { room, message, author } => engine.handle(EngineEvent::ChildAdded {
            collection: messages_of(*room),
            key: message_key(*message),
            value: json!({ "author": format!("u{author}"), "body": "x", "timestamp": 1 }),
        }),
        Step::MessageRemoved { room, message } => engine.handle(EngineEvent::ChildRemoved {
            collection: messages_of(*room),
            key: message_key(*message),
        }),
    };
    if actions.contains(&EngineAction::ScheduleFlush) {
        engine.flush();
    }
}

fn signed_in_engine() -> SyncEngine {
    let mut engine = SyncEngine::new(EngineConfig::default());
    let _ = engine.start();
    let _ = engine.handle(EngineEvent::IdentityChanged(Some(Identity::new("me", "Me"))));
    engine
}

proptest! {
    /// Invariants hold after every event, whatever the order.
    #[test]
    fn prop_invariants_hold(steps in prop::collection::vec(step_strategy(), 0..80)) {
        let mut engine = signed_in_engine();
        let invariants = InvariantRegistry::standard();

        for step in &steps {
            drive(&mut engine, step);
            let snapshot = SystemSnapshot::single("engine", engine.snapshot());
            prop_assert!(
                invariants.check_all(&snapshot).is_ok(),
                "Invariant violated after {:?}", step
            );
        }
    }

    /// The visible rooms and messages are exactly what the store reported.
    #[test]
    fn prop_state_matches_model(steps in prop::collection::vec(step_strategy(), 0..80)) {
        let mut engine = signed_in_engine();
        let mut model = Model::default();

        for step in &steps {
            drive(&mut engine, step);
            model.apply(step);
        }

        let snapshot = engine.snapshot();
        let rooms: BTreeSet<&str> = snapshot.rooms.iter().map(|room| room.id.as_str()).collect();
        let expected: BTreeSet<&str> = model.rooms.keys().map(String::as_str).collect();
        prop_assert_eq!(rooms, expected);

        for room in &snapshot.rooms {
            let ids: BTreeSet<String> =
                room.messages.iter().map(|message| message.id.clone()).collect();
            prop_assert_eq!(ids.len(), room.messages.len());
            prop_assert_eq!(&ids, &model.rooms[&room.id]);
        }
    }

    /// Delivering every addition twice in a row looks like delivering it once.
    #[test]
    fn prop_redelivery_is_idempotent(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let additions: Vec<Step> = steps
            .into_iter()
            .filter(|step| matches!(step, Step::RoomAdded(_) | Step::MessageAdded { .. }))
            .collect();

        let mut once = signed_in_engine();
        let mut twice = signed_in_engine();
        for step in &additions {
            drive(&mut once, step);
            drive(&mut twice, step);
            drive(&mut twice, step);
        }
        prop_assert_eq!(twice.snapshot(), once.snapshot());
    }
}
