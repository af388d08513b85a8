//! Synchronous simulated client.
//!
//! A [`SimClient`] owns one engine and one backend and executes every action
//! the moment it is produced. Delivery is explicit: nothing reaches the engine
//! until [`SimClient::step`] or [`settle`] pumps the client's queue, so tests
//! control interleaving between clients exactly.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::sync::{Arc, Mutex};

use rand::Rng;
use roomsync_core::{AppSnapshot, EngineAction, EngineConfig, SyncEngine, SyncError};
use roomsync_proto::{AuthError, Identity};

use crate::{backend::SimBackend, memory_store::MemoryStore, sim_auth::SimAuth};

type Observed = Arc<Mutex<Vec<AppSnapshot>>>;

/// One engine wired to a store session and a simulated auth provider.
pub struct SimClient {
    name: String,
    engine: SyncEngine,
    backend: SimBackend,
    /// Every snapshot the observer received, in order.
    observed: Observed,
}

impl std::fmt::Debug for SimClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimClient").field("name", &self.name).finish_non_exhaustive()
    }
}

impl SimClient {
    /// Connect a client for `account` with the default configuration.
    pub fn new(name: impl Into<String>, store: &MemoryStore, account: Identity) -> Self {
        Self::with_config(name, store, account, EngineConfig::default())
    }

    /// Connect a client with an explicit configuration.
    ///
    /// The client subscribes an observer and starts the engine; the room
    /// subscriptions' initial deliveries are queued, not yet applied.
    pub fn with_config(
        name: impl Into<String>,
        store: &MemoryStore,
        account: Identity,
        config: EngineConfig,
    ) -> Self {
        let observed: Observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let mut engine = SyncEngine::new(config);
        let (_, subscribed) = engine.subscribe(Box::new(move |snapshot: &AppSnapshot| {
            lock(&sink).push(snapshot.clone());
        }));

        let backend = SimBackend::new(store.connect(), SimAuth::new(account));
        let mut client = Self { name: name.into(), engine, backend, observed };
        client.apply(subscribed);
        let started = client.engine.start();
        client.apply(started);
        client
    }

    /// Execute a tick's actions, flushing after the rest.
    fn apply(&mut self, actions: Vec<EngineAction>) {
        let mut flush = false;
        for action in actions {
            match action {
                EngineAction::ScheduleFlush => flush = true,
                action => self.backend.execute(action),
            }
        }
        if flush {
            self.engine.flush();
        }
    }

    /// Deliver one queued event. Returns `false` if nothing was queued.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.backend.next_event() else {
            return false;
        };
        let actions = self.engine.handle(event);
        self.apply(actions);
        true
    }

    /// Deliver events until the queue is empty. Returns the number delivered.
    pub fn settle(&mut self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
        }
        steps
    }

    /// Whether any event is waiting.
    pub fn has_pending(&self) -> bool {
        self.backend.has_pending()
    }

    /// Start interactive sign-in.
    pub fn sign_in(&mut self) {
        let (_, actions) = self.engine.sign_in();
        self.apply(actions);
    }

    /// Make the next sign-in fail.
    pub fn reject_next_sign_in(&mut self, error: AuthError) {
        self.backend.auth_mut().reject_next(error);
    }

    /// Sign out.
    pub fn sign_out(&mut self) {
        let (_, actions) = self.engine.sign_out();
        self.apply(actions);
    }

    /// Create a room.
    pub fn create_room(&mut self, name: &str) -> Result<(), SyncError> {
        let actions = self.engine.create_room(name)?;
        self.apply(actions);
        Ok(())
    }

    /// Select a room by id.
    pub fn select_room(&mut self, room_id: &str) {
        let actions = self.engine.select_room(room_id);
        self.apply(actions);
    }

    /// Select the first room named `name`. Returns `false` if none is known.
    pub fn select_room_named(&mut self, name: &str) -> bool {
        let Some(room_id) = self.engine.snapshot().room_named(name).map(|room| room.id.clone())
        else {
            return false;
        };
        self.select_room(&room_id);
        true
    }

    /// Delete a room.
    pub fn delete_room(&mut self, room_id: &str) -> Result<(), SyncError> {
        let actions = self.engine.delete_room(room_id)?;
        self.apply(actions);
        Ok(())
    }

    /// Set the account nickname.
    pub fn set_nickname(&mut self, nickname: &str) -> Result<(), SyncError> {
        let actions = self.engine.set_nickname(nickname)?;
        self.apply(actions);
        Ok(())
    }

    /// Send a message to the selected room.
    pub fn send_message(&mut self, body: &str) -> Result<(), SyncError> {
        let actions = self.engine.send_message(body)?;
        self.apply(actions);
        Ok(())
    }

    /// Clear the last error.
    pub fn dismiss_error(&mut self) {
        let actions = self.engine.dismiss_error();
        self.apply(actions);
    }

    /// Current engine state.
    pub fn snapshot(&self) -> AppSnapshot {
        self.engine.snapshot()
    }

    /// Every snapshot the observer received.
    pub fn observed(&self) -> Vec<AppSnapshot> {
        lock(&self.observed).clone()
    }

    /// Most recent snapshot the observer received.
    pub fn last_observed(&self) -> Option<AppSnapshot> {
        lock(&self.observed).last().cloned()
    }

    /// Client name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of this client's store session, as recorded in the store's log.
    pub fn session_id(&self) -> usize {
        self.backend.session().id()
    }

    /// The engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }
}

#[allow(clippy::expect_used)]
fn lock(observed: &Observed) -> std::sync::MutexGuard<'_, Vec<AppSnapshot>> {
    observed.lock().expect("Mutex poisoned")
}

/// Deliver events round-robin, one per client per round, until every queue
/// is empty. Returns the number of events delivered.
pub fn settle(clients: &mut [&mut SimClient]) -> usize {
    let mut steps = 0;
    loop {
        let mut progressed = false;
        for client in clients.iter_mut() {
            if client.step() {
                progressed = true;
                steps += 1;
            }
        }
        if !progressed {
            return steps;
        }
    }
}

/// Deliver events to randomly chosen clients until every queue is empty.
///
/// The same RNG state always produces the same interleaving.
pub fn settle_shuffled(clients: &mut [&mut SimClient], rng: &mut impl Rng) -> usize {
    let mut steps = 0;
    loop {
        let ready: Vec<usize> =
            (0..clients.len()).filter(|index| clients[*index].has_pending()).collect();
        if ready.is_empty() {
            return steps;
        }
        let pick = ready[rng.gen_range(0..ready.len())];
        if clients[pick].step() {
            steps += 1;
        }
    }
}
