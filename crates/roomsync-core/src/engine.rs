//! Synchronization engine.
//!
//! [`SyncEngine`] is the composition root. It owns the room registry, the
//! current identity, the nickname resolver and the update coalescer, and is
//! the only surface the UI layer talks to.
//!
//! This is a pure state machine: store notifications and operation outcomes
//! enter through [`SyncEngine::handle`], user intents through the intent
//! methods, and both return [`EngineAction`]s for the caller to execute. No
//! state change is ever assumed to be reflected remotely until the store
//! reports it back.
//!
//! # Ticks
//!
//! Each call into the engine is one tick. Any number of state changes within
//! a tick produce at most one [`EngineAction::ScheduleFlush`]; the caller
//! runs [`SyncEngine::flush`] once it has executed the tick's other actions.

use std::collections::HashSet;

use roomsync_proto::{
    Identity, MembershipRecord, MessageRecord, NewMessage, Record, Role, RoomId, RoomRecord,
    StoreError, StorePath,
};
use serde_json::Value;

use crate::{
    AppSnapshot, ChildEventKind, Collection, EngineAction, EngineConfig, EngineEvent, RequestId,
    RoomRegistry, SyncError,
    coalescer::{Observer, SubscriptionId, UpdateCoalescer},
    context::{Effects, Pending, PendingOp, RoomContext},
    membership::FetchOutcome,
    nickname::{NicknameResolver, Settled, Waiter},
};

/// Reactive synchronization engine for rooms, memberships and messages.
#[derive(Debug)]
pub struct SyncEngine {
    config: EngineConfig,
    /// Signed-in account. `None` when signed out.
    identity: Option<Identity>,
    /// Nickname set through [`SyncEngine::set_nickname`] for this identity.
    nickname: Option<String>,
    registry: RoomRegistry,
    resolver: NicknameResolver,
    coalescer: UpdateCoalescer,
    effects: Effects,
    /// Rooms whose message collection is subscribed. An id leaves the set
    /// when its room is removed; the store-side subscription stays open.
    message_subscriptions: HashSet<RoomId>,
    started: bool,
}

impl SyncEngine {
    /// Create an engine with no identity and no rooms.
    pub fn new(config: EngineConfig) -> Self {
        let effects = Effects::new(config.layout.clone());
        Self {
            config,
            identity: None,
            nickname: None,
            registry: RoomRegistry::new(),
            resolver: NicknameResolver::new(),
            coalescer: UpdateCoalescer::new(),
            effects,
            message_subscriptions: HashSet::new(),
            started: false,
        }
    }

    /// Open the rooms collection subscriptions.
    ///
    /// Only the first call emits actions.
    pub fn start(&mut self) -> Vec<EngineAction> {
        if std::mem::replace(&mut self.started, true) {
            return Vec::new();
        }
        tracing::info!(rooms = %self.config.layout.rooms, "starting room sync");
        let rooms = self.config.layout.rooms.clone();
        for kind in [ChildEventKind::Added, ChildEventKind::Removed] {
            self.effects
                .subscribe(EngineAction::Subscribe { collection: rooms.clone(), kind });
        }
        self.finish()
    }

    /// Process a store or auth event.
    pub fn handle(&mut self, event: EngineEvent) -> Vec<EngineAction> {
        match event {
            EngineEvent::ChildAdded { collection, key, value } => {
                self.on_child_added(&collection, &key, &value);
            },
            EngineEvent::ChildRemoved { collection, key } => {
                self.on_child_removed(&collection, &key);
            },
            EngineEvent::SetCompleted { request, result } => {
                if let Some(pending) = self.take_pending(request) {
                    self.on_set_completed(pending, result);
                }
            },
            EngineEvent::PushCompleted { request, result } => {
                if let Some(pending) = self.take_pending(request) {
                    self.on_push_completed(pending, result);
                }
            },
            EngineEvent::FetchCompleted { request, result } => {
                if let Some(pending) = self.take_pending(request) {
                    self.on_fetch_completed(request, pending, result);
                }
            },
            EngineEvent::IdentityChanged(identity) => self.on_identity_changed(identity),
            EngineEvent::AuthCompleted { request, result } => {
                if self.take_pending(request).is_some() {
                    match result {
                        Ok(()) => tracing::debug!(%request, "auth flow completed"),
                        Err(error) => self.effects.report_error(SyncError::AuthFailed(error)),
                    }
                }
            },
        }
        self.finish()
    }

    /// Create a room named `name`, owned by the signed-in account.
    ///
    /// Pushes the room record, then writes the owner membership, then
    /// selects the room once the registry has it.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotAuthenticated`] when signed out
    /// - [`SyncError::InvalidRecord`] for a blank name
    pub fn create_room(&mut self, name: &str) -> Result<Vec<EngineAction>, SyncError> {
        let owner = self.identity.clone().ok_or(SyncError::NotAuthenticated)?;
        let record = RoomRecord::new(name.trim());
        record.validate()?;

        let nickname = self.account_nickname();
        tracing::info!(name = %record.name, owner = %owner.id, "creating room");
        self.effects.push(
            self.config.layout.rooms.clone(),
            record.encode(),
            PendingOp::CreateRoom { owner, nickname },
        );
        Ok(self.finish())
    }

    /// Select a known room.
    ///
    /// No-op if the room is unknown or already selected. Otherwise makes sure
    /// the account is a member and starts message sync for the room.
    pub fn select_room(&mut self, room_id: &str) -> Vec<EngineAction> {
        self.select(room_id);
        self.finish()
    }

    /// Delete a room and everything under it.
    ///
    /// Clears the message collection, then the room record, then the
    /// membership collection, each step after the previous one is
    /// acknowledged. The local room disappears when the store reports the
    /// removal.
    ///
    /// Only rooms present in the registry are deleted. An unknown id
    /// (including the empty id) issues nothing and returns no actions.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAuthenticated`] when signed out.
    pub fn delete_room(&mut self, room_id: &str) -> Result<Vec<EngineAction>, SyncError> {
        if self.identity.is_none() {
            return Err(SyncError::NotAuthenticated);
        }
        let Some(room) = self.registry.find_by_id(room_id) else {
            tracing::debug!(%room_id, "delete of unknown room ignored");
            return Ok(self.finish());
        };
        let room_id = room.id().to_string();
        tracing::info!(%room_id, "deleting room");
        let path = self.config.layout.room_messages(&room_id);
        self.effects.set(path, None, PendingOp::ClearMessages { room_id });
        Ok(self.finish())
    }

    /// Set the account nickname used for new membership records.
    ///
    /// When signed in with a room selected, also rewrites the nickname in
    /// that room's membership record. The nickname lasts until the identity
    /// changes.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidRecord`] for a blank nickname.
    pub fn set_nickname(&mut self, nickname: &str) -> Result<Vec<EngineAction>, SyncError> {
        let nickname = nickname.trim();
        MembershipRecord::new(nickname, Role::Unset).validate()?;
        self.nickname = Some(nickname.to_string());

        if let (Some(identity), Some(room_id)) = (&self.identity, self.registry.selected_id()) {
            let path = self.config.layout.member(room_id, &identity.id).child("nickname");
            let op = PendingOp::UpdateNickname { room_id: room_id.to_string() };
            self.effects.set(path, Some(Value::String(nickname.to_string())), op);
        }
        self.effects.notify();
        Ok(self.finish())
    }

    /// Post a message to the selected room.
    ///
    /// The store assigns the timestamp. The message shows up in the log when
    /// the store delivers it back.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotAuthenticated`] when signed out
    /// - [`SyncError::NoRoomSelected`] when no room is selected
    pub fn send_message(&mut self, body: &str) -> Result<Vec<EngineAction>, SyncError> {
        let identity = self.identity.as_ref().ok_or(SyncError::NotAuthenticated)?;
        let room_id = self.registry.selected_id().ok_or(SyncError::NoRoomSelected)?;

        let collection = self.config.layout.room_messages(room_id);
        let message = NewMessage::new(identity.id.clone(), body);
        self.effects.push(collection, message.encode(), PendingOp::SendMessage);
        Ok(self.finish())
    }

    /// Start interactive sign-in.
    ///
    /// [`EngineEvent::AuthCompleted`] with the returned id signals the end of
    /// the flow. The identity itself arrives as
    /// [`EngineEvent::IdentityChanged`].
    pub fn sign_in(&mut self) -> (RequestId, Vec<EngineAction>) {
        let request = self.effects.auth(true);
        (request, self.finish())
    }

    /// Sign the current account out.
    pub fn sign_out(&mut self) -> (RequestId, Vec<EngineAction>) {
        let request = self.effects.auth(false);
        (request, self.finish())
    }

    /// Clear `last_error`.
    pub fn dismiss_error(&mut self) -> Vec<EngineAction> {
        if self.effects.clear_error() {
            self.effects.notify();
        }
        self.finish()
    }

    /// Register the observer, replacing any previous one.
    ///
    /// The new observer receives the current state on the next flush.
    pub fn subscribe(&mut self, observer: Observer) -> (SubscriptionId, Vec<EngineAction>) {
        let (id, scheduled) = self.coalescer.subscribe(observer);
        let actions = if scheduled { vec![EngineAction::ScheduleFlush] } else { Vec::new() };
        (id, actions)
    }

    /// Remove the observer if `id` is still the registered one.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.coalescer.unsubscribe(id)
    }

    /// Deliver the pending notification, if any.
    ///
    /// Returns `true` if the observer was called.
    pub fn flush(&mut self) -> bool {
        let Self { config, identity, nickname, registry, effects, coalescer, .. } = self;
        coalescer.flush(|| {
            build_snapshot(config, identity.as_ref(), nickname.as_deref(), registry, effects)
        })
    }

    /// Current state.
    pub fn snapshot(&self) -> AppSnapshot {
        build_snapshot(
            &self.config,
            self.identity.as_ref(),
            self.nickname.as_deref(),
            &self.registry,
            &self.effects,
        )
    }

    /// Signed-in account.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Known rooms.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Author nickname cache.
    pub fn resolver(&self) -> &NicknameResolver {
        &self.resolver
    }

    /// Number of issued operations without a completion.
    pub fn pending_requests(&self) -> usize {
        self.effects.pending_count()
    }

    /// Whether the message collection of `room_id` is subscribed.
    pub fn is_syncing_messages(&self, room_id: &str) -> bool {
        self.message_subscriptions.contains(room_id)
    }

    fn account_nickname(&self) -> String {
        account_nickname(&self.config, self.identity.as_ref(), self.nickname.as_deref())
    }

    fn finish(&mut self) -> Vec<EngineAction> {
        let (mut actions, notify) = self.effects.drain();
        if notify && self.coalescer.request() {
            actions.push(EngineAction::ScheduleFlush);
        }
        actions
    }

    fn take_pending(&mut self, request: RequestId) -> Option<Pending> {
        let pending = self.effects.complete(request);
        if pending.is_none() {
            tracing::debug!(%request, "completion for unknown request");
        }
        pending
    }

    fn select(&mut self, room_id: &str) {
        if !self.registry.select(room_id) {
            return;
        }
        tracing::debug!(%room_id, "room selected");
        let nickname = self.account_nickname();
        if let Some(room) = self.registry.find_by_id_mut(room_id) {
            room.membership.ensure(room_id, self.identity.as_ref(), &nickname, &mut self.effects);
        }
        self.begin_message_sync(room_id);
        self.effects.notify();
    }

    fn begin_message_sync(&mut self, room_id: &str) {
        if !self.message_subscriptions.insert(room_id.to_string()) {
            return;
        }
        let collection = self.config.layout.room_messages(room_id);
        for kind in [ChildEventKind::Added, ChildEventKind::Removed] {
            self.effects
                .subscribe(EngineAction::Subscribe { collection: collection.clone(), kind });
        }
    }

    fn refresh_membership(&mut self, room_id: &str) {
        if let Some(room) = self.registry.find_by_id_mut(room_id) {
            room.membership.refresh(room_id, self.identity.as_ref(), &mut self.effects);
        }
    }

    fn on_child_added(&mut self, collection: &StorePath, key: &str, value: &Value) {
        match self.config.layout.classify(collection) {
            Some(Collection::Rooms) => {
                let record = match RoomRecord::decode(value) {
                    Ok(record) => record,
                    Err(error) => {
                        tracing::warn!(room_id = %key, %error, "ignoring malformed room");
                        return;
                    },
                };
                if self.registry.on_room_added(key, record) {
                    tracing::debug!(room_id = %key, "room added");
                    self.refresh_membership(key);
                    self.effects.notify();
                }
            },
            Some(Collection::Messages(room_id)) => self.on_message_added(&room_id, key, value),
            None => tracing::debug!(%collection, "child added to unwatched collection"),
        }
    }

    fn on_message_added(&mut self, room_id: &str, message_id: &str, value: &Value) {
        let Some(room) = self.registry.find_by_id_mut(room_id) else {
            tracing::debug!(%room_id, %message_id, "message for unknown room");
            return;
        };
        let record = match MessageRecord::decode(value) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(%room_id, %message_id, %error, "ignoring malformed message");
                return;
            },
        };

        let author_id = record.author.clone();
        let cached = self.resolver.cached(&author_id);
        let resolved = cached.is_some();
        if !room.log.ingest(message_id, record, cached) {
            return;
        }
        if !resolved {
            let waiter = Waiter { room_id: room_id.to_string(), message_id: message_id.to_string() };
            self.resolver.resolve(&author_id, waiter, &mut self.effects);
        }
        self.effects.notify();
    }

    fn on_child_removed(&mut self, collection: &StorePath, key: &str) {
        match self.config.layout.classify(collection) {
            Some(Collection::Rooms) => {
                if self.registry.on_room_removed(key) {
                    tracing::debug!(room_id = %key, "room removed");
                    self.message_subscriptions.remove(key);
                    self.effects.notify();
                }
            },
            Some(Collection::Messages(room_id)) => {
                if let Some(room) = self.registry.find_by_id_mut(&room_id)
                    && room.log.remove(key)
                {
                    self.effects.notify();
                }
            },
            None => tracing::debug!(%collection, "child removed from unwatched collection"),
        }
    }

    fn write_failed(&mut self, path: StorePath, source: StoreError) {
        self.effects.report_error(SyncError::StoreWriteFailed { path, source });
    }

    fn on_set_completed(&mut self, pending: Pending, result: Result<(), StoreError>) {
        let Pending { op, path } = pending;
        match op {
            PendingOp::WriteOwner { room_id } => {
                if let Err(source) = result {
                    self.write_failed(path, source);
                    return;
                }
                if self.registry.contains(&room_id) {
                    self.refresh_membership(&room_id);
                    self.select(&room_id);
                } else {
                    self.effects.report_error(SyncError::RoomNotFound { room_id });
                }
            },
            PendingOp::ClearMessages { room_id } => {
                if let Err(error) = result {
                    tracing::debug!(%room_id, %error, "clearing messages failed, continuing");
                }
                let path = self.config.layout.room(&room_id);
                self.effects.set(path, None, PendingOp::DeleteRoomRecord { room_id });
            },
            PendingOp::DeleteRoomRecord { room_id } => {
                if let Err(source) = result {
                    self.write_failed(path, source);
                    return;
                }
                let path = self.config.layout.room_members(&room_id);
                self.effects.set(path, None, PendingOp::DeleteMembers);
            },
            PendingOp::DeleteMembers => match result {
                Ok(()) => {},
                Err(error) if error.is_not_found() => {
                    tracing::debug!(%path, "room had no members");
                },
                Err(source) => self.write_failed(path, source),
            },
            PendingOp::EnsureMembership { room_id } | PendingOp::UpdateNickname { room_id } => {
                match result {
                    Ok(()) => self.refresh_membership(&room_id),
                    Err(source) => self.write_failed(path, source),
                }
            },
            op => tracing::warn!(?op, "set completion for non-write operation"),
        }
    }

    fn on_push_completed(&mut self, pending: Pending, result: Result<String, StoreError>) {
        let Pending { op, path } = pending;
        let key = match result {
            Ok(key) => key,
            Err(source) => {
                self.write_failed(path, source);
                return;
            },
        };
        match op {
            PendingOp::CreateRoom { owner, nickname } => {
                let member = self.config.layout.member(&key, &owner.id);
                let record = MembershipRecord::new(nickname, Role::Owner);
                tracing::debug!(room_id = %key, "room pushed, writing owner");
                self.effects.set(member, Some(record.encode()), PendingOp::WriteOwner {
                    room_id: key,
                });
            },
            PendingOp::SendMessage => tracing::debug!(message_id = %key, "message pushed"),
            op => tracing::warn!(?op, "push completion for non-push operation"),
        }
    }

    fn on_fetch_completed(
        &mut self,
        request: RequestId,
        pending: Pending,
        result: Result<Option<Value>, StoreError>,
    ) {
        let Pending { op, path } = pending;
        match op {
            PendingOp::FetchMembership { room_id } => {
                let outcome = match result {
                    Ok(Some(value)) => FetchOutcome::Found(value),
                    Ok(None) => FetchOutcome::Missing,
                    Err(source) => FetchOutcome::Failed(SyncError::ResolutionFailed { path, source }),
                };
                let nickname = self.account_nickname();
                let Some(room) = self.registry.find_by_id_mut(&room_id) else {
                    tracing::debug!(%room_id, "membership fetched for removed room");
                    return;
                };
                room.membership.on_fetched(
                    &room_id,
                    request,
                    outcome,
                    self.identity.as_ref(),
                    &nickname,
                    &mut self.effects,
                );
            },
            PendingOp::ResolveNickname { author_id } => {
                match self.resolver.complete(&author_id, request, result) {
                    Some(Settled::Resolved { nickname, waiters }) => {
                        tracing::debug!(%author_id, waiting = waiters.len(), "author resolved");
                        self.backfill(&author_id, &nickname);
                    },
                    Some(Settled::Unavailable { waiters }) => {
                        tracing::debug!(%author_id, waiting = waiters.len(), "author has no record");
                    },
                    Some(Settled::Failed { error, .. }) => {
                        self.effects
                            .report_error(SyncError::ResolutionFailed { path, source: error });
                    },
                    None => {},
                }
            },
            op => tracing::warn!(?op, "fetch completion for non-fetch operation"),
        }
    }

    /// Resolve every message by `author_id` still showing the raw id, in
    /// every room. Covers messages whose earlier fetch failed.
    fn backfill(&mut self, author_id: &str, nickname: &str) {
        let mut changed = false;
        for room in self.registry.iter_mut() {
            changed |= room.log.backfill_author(author_id, nickname) > 0;
        }
        if changed {
            self.effects.notify();
        }
    }

    fn on_identity_changed(&mut self, identity: Option<Identity>) {
        if self.identity == identity {
            return;
        }
        tracing::info!(user_id = ?identity.as_ref().map(|id| &id.id), "identity changed");
        self.identity = identity;
        self.nickname = None;

        for room in self.registry.iter_mut() {
            room.membership.reset();
            let room_id = room.id().to_string();
            room.membership.refresh(&room_id, self.identity.as_ref(), &mut self.effects);
        }

        let nickname = self.account_nickname();
        if let Some(room_id) = self.registry.selected_id().map(str::to_string)
            && let Some(room) = self.registry.find_by_id_mut(&room_id)
        {
            room.membership.ensure(&room_id, self.identity.as_ref(), &nickname, &mut self.effects);
        }
        self.effects.notify();
    }
}

fn account_nickname(
    config: &EngineConfig,
    identity: Option<&Identity>,
    nickname: Option<&str>,
) -> String {
    nickname
        .or_else(|| identity.map(|identity| identity.display_name.as_str()))
        .filter(|nickname| !nickname.trim().is_empty())
        .unwrap_or(config.unknown_nickname.as_str())
        .to_string()
}

fn build_snapshot(
    config: &EngineConfig,
    identity: Option<&Identity>,
    nickname: Option<&str>,
    registry: &RoomRegistry,
    effects: &Effects,
) -> AppSnapshot {
    AppSnapshot {
        identity: identity.cloned(),
        nickname: account_nickname(config, identity, nickname),
        rooms: registry.iter().map(|room| room.view(&config.unknown_nickname)).collect(),
        selected_room: registry.selected_id().map(str::to_string),
        last_error: effects.last_error().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    fn alice() -> Identity {
        Identity::new("alice-id", "Alice")
    }

    fn signed_in() -> SyncEngine {
        let mut engine = SyncEngine::new(EngineConfig::default());
        let _ = engine.start();
        let _ = engine.handle(EngineEvent::IdentityChanged(Some(alice())));
        engine
    }

    fn room_added(engine: &mut SyncEngine, id: &str, name: &str) -> Vec<EngineAction> {
        engine.handle(EngineEvent::ChildAdded {
            collection: StorePath::new("rooms"),
            key: id.into(),
            value: json!({ "name": name }),
        })
    }

    fn message_added(
        engine: &mut SyncEngine,
        room: &str,
        id: &str,
        author: &str,
    ) -> Vec<EngineAction> {
        engine.handle(EngineEvent::ChildAdded {
            collection: StorePath::new("messages").child(room),
            key: id.into(),
            value: json!({ "author": author, "body": format!("body of {id}"), "timestamp": 1 }),
        })
    }

    fn fetches(actions: &[EngineAction]) -> Vec<(RequestId, String)> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Fetch { request, path } => {
                    Some((*request, path.as_str().to_string()))
                },
                _ => None,
            })
            .collect()
    }

    fn sets(actions: &[EngineAction]) -> Vec<(RequestId, String, Option<Value>)> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Set { request, path, value } => {
                    Some((*request, path.as_str().to_string(), value.clone()))
                },
                _ => None,
            })
            .collect()
    }

    fn answer_fetches(engine: &mut SyncEngine, actions: &[EngineAction], value: Option<Value>) {
        for (request, _) in fetches(actions) {
            let _ = engine.handle(EngineEvent::FetchCompleted { request, result: Ok(value.clone()) });
        }
    }

    #[test]
    fn start_subscribes_rooms_once() {
        let mut engine = SyncEngine::new(EngineConfig::default());
        let actions = engine.start();
        assert_eq!(actions, vec![
            EngineAction::Subscribe {
                collection: StorePath::new("rooms"),
                kind: ChildEventKind::Added,
            },
            EngineAction::Subscribe {
                collection: StorePath::new("rooms"),
                kind: ChildEventKind::Removed,
            },
        ]);
        assert!(engine.start().is_empty());
    }

    #[test]
    fn duplicate_room_delivery_yields_one_room() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let second = room_added(&mut engine, "r1", "general");
        assert!(second.is_empty());
        assert_eq!(engine.snapshot().rooms.len(), 1);
    }

    #[test]
    fn malformed_room_is_ignored() {
        let mut engine = signed_in();
        let actions = engine.handle(EngineEvent::ChildAdded {
            collection: StorePath::new("rooms"),
            key: "r1".into(),
            value: json!({ "title": "no name field" }),
        });
        assert!(actions.is_empty());
        assert!(engine.snapshot().rooms.is_empty());
    }

    #[test]
    fn send_message_without_identity_issues_nothing() {
        let mut engine = SyncEngine::new(EngineConfig::default());
        let _ = engine.start();
        assert_eq!(engine.send_message("hi"), Err(SyncError::NotAuthenticated));
        assert_eq!(engine.pending_requests(), 0);
    }

    #[test]
    fn send_message_without_selection_fails() {
        let mut engine = signed_in();
        assert_eq!(engine.send_message("hi"), Err(SyncError::NoRoomSelected));
    }

    #[test]
    fn create_and_delete_require_identity() {
        let mut engine = SyncEngine::new(EngineConfig::default());
        assert_eq!(engine.create_room("x"), Err(SyncError::NotAuthenticated));
        assert_eq!(engine.delete_room("r1"), Err(SyncError::NotAuthenticated));
    }

    #[test]
    fn blank_room_name_is_rejected() {
        let mut engine = signed_in();
        assert!(matches!(engine.create_room("   "), Err(SyncError::InvalidRecord(_))));
    }

    #[test]
    fn send_message_pushes_with_server_timestamp() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");

        let actions = engine.send_message("hi").expect("signed in with a room");
        assert!(matches!(
            actions.as_slice(),
            [EngineAction::Push { collection, value, .. }]
                if collection.as_str() == "messages/r1"
                    && value == &json!({
                        "author": "alice-id",
                        "body": "hi",
                        "timestamp": { ".sv": "timestamp" },
                    })
        ));
    }

    #[test]
    fn create_room_writes_owner_then_selects() {
        let mut engine = signed_in();
        let actions = engine.create_room("general").expect("signed in");
        let push = match actions.as_slice() {
            [EngineAction::Push { request, collection, value }] => {
                assert_eq!(collection.as_str(), "rooms");
                assert_eq!(value, &json!({ "name": "general" }));
                *request
            },
            other => panic!("expected push, got {other:?}"),
        };

        let added = room_added(&mut engine, "r1", "general");
        let actions =
            engine.handle(EngineEvent::PushCompleted { request: push, result: Ok("r1".into()) });
        let (owner_write, path, value) = sets(&actions).remove(0);
        assert_eq!(path, "members/r1/alice-id");
        assert_eq!(value, Some(json!({ "nickname": "Alice", "role": "owner" })));

        let actions =
            engine.handle(EngineEvent::SetCompleted { request: owner_write, result: Ok(()) });
        assert_eq!(engine.snapshot().selected_room.as_deref(), Some("r1"));
        assert!(engine.is_syncing_messages("r1"));

        // Owner record arrives for both outstanding fetches; no member write
        answer_fetches(
            &mut engine,
            &added,
            Some(json!({ "nickname": "Alice", "role": "owner" })),
        );
        let mut follow_up = Vec::new();
        for (request, _) in fetches(&actions) {
            follow_up.extend(engine.handle(EngineEvent::FetchCompleted {
                request,
                result: Ok(Some(json!({ "nickname": "Alice", "role": "owner" }))),
            }));
        }
        assert!(sets(&follow_up).is_empty());
        assert_eq!(engine.snapshot().selected().map(|room| room.role), Some(Role::Owner));
    }

    #[test]
    fn owner_write_failure_surfaces_and_leaves_selection() {
        let mut engine = signed_in();
        let actions = engine.create_room("x").expect("signed in");
        let push = match actions.as_slice() {
            [EngineAction::Push { request, .. }] => *request,
            other => panic!("expected push, got {other:?}"),
        };
        let _ = room_added(&mut engine, "r1", "x");
        let actions =
            engine.handle(EngineEvent::PushCompleted { request: push, result: Ok("r1".into()) });
        let (owner_write, path, _) = sets(&actions).remove(0);

        let denied = StoreError::PermissionDenied { path: StorePath::new(&path) };
        let _ = engine
            .handle(EngineEvent::SetCompleted { request: owner_write, result: Err(denied.clone()) });

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.selected_room, None);
        assert!(snapshot.room("r1").is_some());
        assert_eq!(
            snapshot.last_error,
            Some(SyncError::StoreWriteFailed { path: StorePath::new(&path), source: denied })
        );
    }

    #[test]
    fn owner_write_before_room_arrives_is_room_not_found() {
        let mut engine = signed_in();
        let actions = engine.create_room("x").expect("signed in");
        let push = match actions.as_slice() {
            [EngineAction::Push { request, .. }] => *request,
            other => panic!("expected push, got {other:?}"),
        };
        let actions =
            engine.handle(EngineEvent::PushCompleted { request: push, result: Ok("r9".into()) });
        let (owner_write, ..) = sets(&actions).remove(0);
        let _ = engine.handle(EngineEvent::SetCompleted { request: owner_write, result: Ok(()) });

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.last_error, Some(SyncError::RoomNotFound { room_id: "r9".into() }));
        assert_eq!(snapshot.selected_room, None);
    }

    #[test]
    fn select_ensures_membership_after_fetch() {
        let mut engine = signed_in();
        let added = room_added(&mut engine, "r1", "general");
        let actions = engine.select_room("r1");
        // Fetch still outstanding: the member write waits
        assert!(sets(&actions).is_empty());

        let (request, _) = fetches(&added)[0];
        let actions = engine.handle(EngineEvent::FetchCompleted { request, result: Ok(None) });
        let writes = sets(&actions);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "members/r1/alice-id");
        assert_eq!(writes[0].2, Some(json!({ "nickname": "Alice", "role": "member" })));

        // Ack triggers a re-fetch that resolves the new record
        let actions =
            engine.handle(EngineEvent::SetCompleted { request: writes[0].0, result: Ok(()) });
        answer_fetches(
            &mut engine,
            &actions,
            Some(json!({ "nickname": "Alice", "role": "member" })),
        );
        let room = engine.snapshot().selected().cloned().expect("selected");
        assert_eq!(room.role, Role::Member);
        assert_eq!(room.nickname, "Alice");
    }

    #[test]
    fn messages_from_one_author_share_one_fetch() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");

        let mut actions = Vec::new();
        for n in 0..5 {
            actions.extend(message_added(&mut engine, "r1", &format!("m{n}"), "bob-id"));
        }
        let author_fetches: Vec<_> =
            fetches(&actions).into_iter().filter(|(_, path)| path == "members/r1/bob-id").collect();
        assert_eq!(author_fetches.len(), 1);

        let shown: Vec<String> = engine.snapshot().rooms[0]
            .messages
            .iter()
            .map(|message| message.author_display.clone())
            .collect();
        assert_eq!(shown, vec!["bob-id"; 5]);

        let _ = engine.handle(EngineEvent::FetchCompleted {
            request: author_fetches[0].0,
            result: Ok(Some(json!({ "nickname": "bob", "role": "member" }))),
        });
        let snapshot = engine.snapshot();
        assert!(snapshot.rooms[0].messages.iter().all(|message| message.author_display == "bob"));

        // Cached author: shown immediately, no fetch
        let actions = message_added(&mut engine, "r1", "m5", "bob-id");
        assert!(fetches(&actions).is_empty());
        assert_eq!(engine.snapshot().rooms[0].messages[5].author_display, "bob");
    }

    #[test]
    fn repeated_message_delivery_is_ignored() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = message_added(&mut engine, "r1", "m1", "bob-id");
        let again = message_added(&mut engine, "r1", "m1", "bob-id");
        assert!(again.is_empty());
        assert_eq!(engine.snapshot().rooms[0].messages.len(), 1);
    }

    #[test]
    fn author_fetch_failure_sets_last_error() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let actions = message_added(&mut engine, "r1", "m1", "bob-id");
        let (request, path) = fetches(&actions).remove(0);
        let error = StoreError::Unavailable { reason: "offline".into() };
        let _ = engine
            .handle(EngineEvent::FetchCompleted { request, result: Err(error.clone()) });
        assert_eq!(
            engine.snapshot().last_error,
            Some(SyncError::ResolutionFailed { path: StorePath::new(&path), source: error })
        );
    }

    #[test]
    fn author_resolved_after_failure_backfills_earlier_messages() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = room_added(&mut engine, "r2", "random");

        let actions = message_added(&mut engine, "r1", "m1", "bob-id");
        let (failed, _) = fetches(&actions).remove(0);
        let error = StoreError::Unavailable { reason: "offline".into() };
        let _ = engine.handle(EngineEvent::FetchCompleted { request: failed, result: Err(error) });

        let actions = message_added(&mut engine, "r2", "m2", "bob-id");
        let (retry, path) = fetches(&actions).remove(0);
        assert_eq!(path, "members/r2/bob-id");
        let _ = engine.handle(EngineEvent::FetchCompleted {
            request: retry,
            result: Ok(Some(json!({ "nickname": "Bobby", "role": "member" }))),
        });

        assert_eq!(engine.resolver().cached("bob-id"), Some("Bobby"));
        let snapshot = engine.snapshot();
        for room in &snapshot.rooms {
            assert_eq!(room.messages[0].author_display, "Bobby", "{}", room.id);
            assert!(room.messages[0].is_author_resolved());
        }
    }

    #[test]
    fn readded_room_resubscribes_its_messages() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");
        assert!(engine.is_syncing_messages("r1"));

        let _ = engine.handle(EngineEvent::ChildRemoved {
            collection: StorePath::new("rooms"),
            key: "r1".into(),
        });
        assert!(!engine.is_syncing_messages("r1"));

        let _ = room_added(&mut engine, "r1", "general");
        let actions = engine.select_room("r1");
        assert!(actions.contains(&EngineAction::Subscribe {
            collection: StorePath::new("messages/r1"),
            kind: ChildEventKind::Added,
        }));
        assert!(engine.is_syncing_messages("r1"));
    }

    #[test]
    fn delete_chain_runs_in_order_and_ignores_empty_messages() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");

        let actions = engine.delete_room("r1").expect("signed in");
        let (clear, path, value) = sets(&actions).remove(0);
        assert_eq!((path.as_str(), value), ("messages/r1", None));

        let missing = StoreError::NotFound { path: StorePath::new("messages/r1") };
        let actions =
            engine.handle(EngineEvent::SetCompleted { request: clear, result: Err(missing) });
        let (record, path, _) = sets(&actions).remove(0);
        assert_eq!(path, "rooms/r1");
        assert_eq!(engine.snapshot().last_error, None);

        let actions = engine.handle(EngineEvent::SetCompleted { request: record, result: Ok(()) });
        let (members, path, _) = sets(&actions).remove(0);
        assert_eq!(path, "members/r1");
        let _ = engine.handle(EngineEvent::SetCompleted { request: members, result: Ok(()) });

        let _ = engine.handle(EngineEvent::ChildRemoved {
            collection: StorePath::new("rooms"),
            key: "r1".into(),
        });
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.selected_room, None);
        assert!(snapshot.rooms.is_empty());
        assert_eq!(snapshot.last_error, None);
    }

    #[test]
    fn delete_of_unknown_room_issues_nothing() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");

        for room_id in ["", "r2", "r1/extra"] {
            let actions = engine.delete_room(room_id).expect("signed in");
            assert!(actions.is_empty(), "{room_id:?}");
        }
        assert_eq!(engine.pending_requests(), 0);
        assert_eq!(engine.snapshot().rooms.len(), 1);
    }

    #[test]
    fn failed_room_record_delete_stops_chain() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let actions = engine.delete_room("r1").expect("signed in");
        let (clear, ..) = sets(&actions).remove(0);
        let actions = engine.handle(EngineEvent::SetCompleted { request: clear, result: Ok(()) });
        let (record, ..) = sets(&actions).remove(0);

        let denied = StoreError::PermissionDenied { path: StorePath::new("rooms/r1") };
        let actions = engine
            .handle(EngineEvent::SetCompleted { request: record, result: Err(denied.clone()) });
        assert!(sets(&actions).is_empty());
        assert_eq!(
            engine.snapshot().last_error,
            Some(SyncError::StoreWriteFailed { path: StorePath::new("rooms/r1"), source: denied })
        );
    }

    #[test]
    fn removed_message_leaves_the_log() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = message_added(&mut engine, "r1", "m1", "bob-id");
        let _ = engine.handle(EngineEvent::ChildRemoved {
            collection: StorePath::new("messages/r1"),
            key: "m1".into(),
        });
        assert!(engine.snapshot().rooms[0].messages.is_empty());
    }

    #[test]
    fn identity_change_resets_and_refetches_every_room() {
        let mut engine = signed_in();
        let first = room_added(&mut engine, "r1", "general");
        let second = room_added(&mut engine, "r2", "random");
        answer_fetches(&mut engine, &first, Some(json!({ "nickname": "al", "role": "owner" })));
        assert_eq!(engine.snapshot().rooms[0].role, Role::Owner);

        let bob = Identity::new("bob-id", "Bob");
        let actions = engine.handle(EngineEvent::IdentityChanged(Some(bob)));
        let paths: Vec<String> = fetches(&actions).into_iter().map(|(_, path)| path).collect();
        assert_eq!(paths, vec!["members/r1/bob-id", "members/r2/bob-id"]);
        assert_eq!(engine.snapshot().rooms[0].role, Role::Unset);
        assert_eq!(engine.snapshot().rooms[0].nickname, "unknown");

        // A late answer for the previous identity is dropped
        answer_fetches(&mut engine, &second, Some(json!({ "nickname": "al", "role": "owner" })));
        assert_eq!(engine.snapshot().rooms[1].role, Role::Unset);
    }

    #[test]
    fn sign_out_clears_membership_without_fetching() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let actions = engine.handle(EngineEvent::IdentityChanged(None));
        assert!(fetches(&actions).is_empty());
        assert_eq!(engine.snapshot().identity, None);
        assert_eq!(engine.snapshot().nickname, "unknown");
    }

    #[test]
    fn set_nickname_rewrites_selected_membership() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");

        let actions = engine.set_nickname("ally").expect("valid nickname");
        let writes = sets(&actions);
        assert_eq!(writes[0].1, "members/r1/alice-id/nickname");
        assert_eq!(writes[0].2, Some(json!("ally")));
        assert_eq!(engine.snapshot().nickname, "ally");

        let actions =
            engine.handle(EngineEvent::SetCompleted { request: writes[0].0, result: Ok(()) });
        assert_eq!(fetches(&actions).len(), 1);
    }

    #[test]
    fn rejected_sign_in_surfaces_auth_failure() {
        let mut engine = SyncEngine::new(EngineConfig::default());
        let (request, actions) = engine.sign_in();
        assert_eq!(actions, vec![EngineAction::SignIn { request }]);
        let _ = engine.handle(EngineEvent::AuthCompleted {
            request,
            result: Err(roomsync_proto::AuthError::Cancelled),
        });
        assert_eq!(
            engine.snapshot().last_error,
            Some(SyncError::AuthFailed(roomsync_proto::AuthError::Cancelled))
        );

        let _ = engine.dismiss_error();
        assert_eq!(engine.snapshot().last_error, None);
    }

    #[test]
    fn one_flush_per_tick() {
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let mut engine = signed_in();
        // Drain the notification left by sign-in
        let _ = engine.flush();
        let (_, actions) = engine.subscribe(Box::new(move |_: &AppSnapshot| {
            *sink.lock().expect("observer mutex") += 1;
        }));
        assert_eq!(actions, vec![EngineAction::ScheduleFlush]);
        assert!(engine.flush());

        let mut scheduled = 0;
        for n in 0..20 {
            let actions = room_added(&mut engine, &format!("r{n}"), "room");
            scheduled += actions.iter().filter(|a| **a == EngineAction::ScheduleFlush).count();
        }
        // Without a flush in between, the pending notification absorbs the rest
        assert_eq!(scheduled, 1);
        assert!(engine.flush());
        assert!(!engine.flush());
        assert_eq!(*seen.lock().expect("observer mutex"), 2);
    }

    #[test]
    fn orphaned_message_subscription_is_inert() {
        let mut engine = signed_in();
        let _ = room_added(&mut engine, "r1", "general");
        let _ = engine.select_room("r1");
        let _ = engine.handle(EngineEvent::ChildRemoved {
            collection: StorePath::new("rooms"),
            key: "r1".into(),
        });
        let actions = message_added(&mut engine, "r1", "m1", "bob-id");
        assert!(actions.is_empty());
        assert!(engine.is_syncing_messages("r1"));
    }
}
