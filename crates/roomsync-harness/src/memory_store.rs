//! Shared in-memory hierarchical store.
//!
//! A [`MemoryStore`] holds one JSON tree shared by any number of client
//! sessions. Each [`StoreSession`] has its own child subscriptions and its own
//! delivery queue, so clients observe each other's writes only when their
//! queue is pumped.
//!
//! # Delivery order
//!
//! A write first queues the child notifications it causes on every session,
//! then queues its acknowledgement on the writing session. A subscription for
//! child additions starts by delivering every existing child in key order.
//! Pushed keys ascend, so arrival order matches push order.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use roomsync_core::{ChildEventKind, EngineEvent, RequestId};
use roomsync_proto::{StoreError, StorePath, is_server_timestamp};
use serde_json::{Map, Value};

use crate::faults::{FaultOp, FaultPlan};

/// First clock value, milliseconds since the Unix epoch.
const EPOCH_MS: u64 = 1_700_000_000_000;

/// Kind of a logged store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Write of a document.
    Set,
    /// Removal of a subtree.
    Remove,
    /// Child creation with a generated key.
    Push,
    /// One-shot read.
    Fetch,
}

/// One operation as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    /// Session that issued it.
    pub session: usize,
    /// Operation kind.
    pub kind: OpKind,
    /// Target path. For pushes, the created child.
    pub path: StorePath,
    /// Whether the store accepted it.
    pub ok: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    subscriptions: Vec<(StorePath, ChildEventKind)>,
    queue: VecDeque<EngineEvent>,
}

#[derive(Debug)]
struct StoreInner {
    tree: Value,
    clock: u64,
    next_push: u64,
    sessions: Vec<SessionState>,
    faults: FaultPlan,
    log: Vec<OpRecord>,
}

/// In-memory store shared between simulated clients.
///
/// Cloning yields another handle to the same tree. Uses `lock().expect()`,
/// which panics if the mutex is poisoned; acceptable for simulation code.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store that never fails.
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::none())
    }

    /// Create an empty store with fault injection.
    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                tree: Value::Object(Map::new()),
                clock: EPOCH_MS,
                next_push: 0,
                sessions: Vec::new(),
                faults,
                log: Vec::new(),
            })),
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Open a new client session.
    pub fn connect(&self) -> StoreSession {
        let mut inner = self.lock();
        inner.sessions.push(SessionState::default());
        StoreSession { store: self.clone(), id: inner.sessions.len() - 1 }
    }

    /// Document at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        lookup(&self.lock().tree, &StorePath::new(path)).cloned()
    }

    /// Write bypassing faults, notifying subscribers.
    pub fn put(&self, path: &str, value: Value) {
        self.lock().apply(&StorePath::new(path), Some(value));
    }

    /// Remove bypassing faults, notifying subscribers.
    pub fn remove(&self, path: &str) {
        self.lock().apply(&StorePath::new(path), None);
    }

    /// Push bypassing faults, notifying subscribers. Returns the new key.
    pub fn push(&self, collection: &str, value: Value) -> String {
        let mut inner = self.lock();
        let key = inner.next_key();
        inner.apply(&StorePath::new(collection).child(&key), Some(value));
        key
    }

    /// Every operation issued by sessions so far.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.lock().log.clone()
    }

    /// Number of operations of `kind` at exactly `path`.
    pub fn count(&self, kind: OpKind, path: &str) -> usize {
        let path = StorePath::new(path);
        self.lock().log.iter().filter(|op| op.kind == kind && op.path == path).count()
    }

    /// Number of failures injected so far.
    pub fn injected_faults(&self) -> usize {
        self.lock().faults.injected()
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.lock().faults = faults;
    }
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn next_key(&mut self) -> String {
        self.next_push += 1;
        format!("-{:012}", self.next_push)
    }

    fn record(&mut self, session: usize, kind: OpKind, path: &StorePath, ok: bool) {
        self.log.push(OpRecord { session, kind, path: path.clone(), ok });
    }

    /// Apply a write and queue the child notifications it causes.
    fn apply(&mut self, path: &StorePath, value: Option<Value>) {
        let watched: BTreeSet<StorePath> = self
            .sessions
            .iter()
            .flat_map(|session| session.subscriptions.iter().map(|(path, _)| path.clone()))
            .collect();
        let before: Vec<(StorePath, BTreeMap<String, Value>)> = watched
            .into_iter()
            .map(|collection| {
                let children = children(&self.tree, &collection);
                (collection, children)
            })
            .collect();

        let segments: Vec<&str> = path.segments().collect();
        match value {
            Some(mut value) if !is_empty(&value) => {
                let now = self.tick();
                resolve_timestamps(&mut value, now);
                insert(&mut self.tree, &segments, value);
            },
            _ => {
                remove(&mut self.tree, &segments);
            },
        }

        for (collection, old) in before {
            let new = children(&self.tree, &collection);
            let added: Vec<(&String, &Value)> =
                new.iter().filter(|(key, _)| !old.contains_key(*key)).collect();
            let removed: Vec<&String> = old.keys().filter(|key| !new.contains_key(*key)).collect();
            if added.is_empty() && removed.is_empty() {
                continue;
            }
            for session in &mut self.sessions {
                for (subscribed, kind) in &session.subscriptions {
                    if *subscribed != collection {
                        continue;
                    }
                    match kind {
                        ChildEventKind::Added => {
                            session.queue.extend(added.iter().map(|(key, value)| {
                                EngineEvent::ChildAdded {
                                    collection: collection.clone(),
                                    key: (*key).clone(),
                                    value: (*value).clone(),
                                }
                            }));
                        },
                        ChildEventKind::Removed => {
                            session.queue.extend(removed.iter().map(|key| {
                                EngineEvent::ChildRemoved {
                                    collection: collection.clone(),
                                    key: (*key).clone(),
                                }
                            }));
                        },
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, session: usize, event: EngineEvent) {
        if let Some(state) = self.sessions.get_mut(session) {
            state.queue.push_back(event);
        }
    }
}

/// One client's connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct StoreSession {
    store: MemoryStore,
    id: usize,
}

impl StoreSession {
    /// Session index within the store.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The shared store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Watch `collection` for `kind` notifications.
    ///
    /// An [`ChildEventKind::Added`] subscription immediately queues every
    /// existing child in key order.
    pub fn subscribe(&self, collection: StorePath, kind: ChildEventKind) {
        let mut inner = self.store.lock();
        if kind == ChildEventKind::Added {
            let existing = children(&inner.tree, &collection);
            let events = existing.into_iter().map(|(key, value)| EngineEvent::ChildAdded {
                collection: collection.clone(),
                key,
                value,
            });
            let events: Vec<EngineEvent> = events.collect();
            for event in events {
                inner.enqueue(self.id, event);
            }
        }
        if let Some(state) = inner.sessions.get_mut(self.id) {
            state.subscriptions.push((collection, kind));
        }
    }

    /// Write or remove the document at `path`.
    ///
    /// Removing a path that holds nothing fails with
    /// [`StoreError::NotFound`].
    pub fn set(&self, request: RequestId, path: StorePath, value: Option<Value>) {
        let mut inner = self.store.lock();
        let removal = value.as_ref().is_none_or(is_empty);
        let kind = if removal { OpKind::Remove } else { OpKind::Set };

        let result = inner.faults.check(FaultOp::Write, &path).and_then(|()| {
            if removal && lookup(&inner.tree, &path).is_none() {
                return Err(StoreError::NotFound { path: path.clone() });
            }
            Ok(())
        });
        inner.record(self.id, kind, &path, result.is_ok());
        if result.is_ok() {
            inner.apply(&path, value);
        }
        inner.enqueue(self.id, EngineEvent::SetCompleted { request, result });
    }

    /// Create a child of `collection` with a generated, ascending key.
    pub fn push(&self, request: RequestId, collection: StorePath, value: Value) {
        let mut inner = self.store.lock();
        let result = match inner.faults.check(FaultOp::Write, &collection) {
            Ok(()) => {
                let key = inner.next_key();
                let path = collection.child(&key);
                inner.record(self.id, OpKind::Push, &path, true);
                inner.apply(&path, Some(value));
                Ok(key)
            },
            Err(error) => {
                inner.record(self.id, OpKind::Push, &collection, false);
                Err(error)
            },
        };
        inner.enqueue(self.id, EngineEvent::PushCompleted { request, result });
    }

    /// Read the document at `path` once.
    pub fn fetch(&self, request: RequestId, path: StorePath) {
        let mut inner = self.store.lock();
        let result = inner
            .faults
            .check(FaultOp::Read, &path)
            .map(|()| lookup(&inner.tree, &path).cloned());
        inner.record(self.id, OpKind::Fetch, &path, result.is_ok());
        inner.enqueue(self.id, EngineEvent::FetchCompleted { request, result });
    }

    /// Next queued notification or completion.
    pub fn next_event(&self) -> Option<EngineEvent> {
        self.store.lock().sessions.get_mut(self.id).and_then(|state| state.queue.pop_front())
    }

    /// Whether anything is queued for this session.
    pub fn has_pending(&self) -> bool {
        self.store.lock().sessions.get(self.id).is_some_and(|state| !state.queue.is_empty())
    }
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

fn lookup<'a>(tree: &'a Value, path: &StorePath) -> Option<&'a Value> {
    path.segments().try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

fn children(tree: &Value, collection: &StorePath) -> BTreeMap<String, Value> {
    lookup(tree, collection)
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
        .unwrap_or_default()
}

fn insert(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        insert(child, rest, value);
    }
}

/// Remove the subtree at `segments`, pruning parents left empty.
fn remove(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        let removed = !is_empty(node);
        *node = Value::Object(Map::new());
        return removed;
    };
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(*first).is_some();
    }
    let Some(child) = map.get_mut(*first) else {
        return false;
    };
    let removed = remove(child, rest);
    if is_empty(child) {
        map.remove(*first);
    }
    removed
}

fn resolve_timestamps(value: &mut Value, now: u64) {
    if is_server_timestamp(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(|child| resolve_timestamps(child, now)),
        Value::Array(items) => items.iter_mut().for_each(|child| resolve_timestamps(child, now)),
        _ => {},
    }
}
