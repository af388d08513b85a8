//! Executes engine actions against the simulated collaborators.

use std::collections::VecDeque;

use roomsync_core::{EngineAction, EngineEvent};

use crate::{memory_store::StoreSession, sim_auth::SimAuth};

/// One client's view of the outside world: a store session and an auth
/// provider.
///
/// Auth events are delivered before store events, since the provider
/// answers synchronously.
#[derive(Debug)]
pub struct SimBackend {
    session: StoreSession,
    auth: SimAuth,
    local: VecDeque<EngineEvent>,
}

impl SimBackend {
    /// Create a backend.
    pub fn new(session: StoreSession, auth: SimAuth) -> Self {
        Self { session, auth, local: VecDeque::new() }
    }

    /// The store session.
    pub fn session(&self) -> &StoreSession {
        &self.session
    }

    /// The auth provider.
    pub fn auth_mut(&mut self) -> &mut SimAuth {
        &mut self.auth
    }

    /// Execute one action.
    ///
    /// [`EngineAction::ScheduleFlush`] belongs to whoever owns the engine
    /// and is ignored here.
    pub fn execute(&mut self, action: EngineAction) {
        match action {
            EngineAction::Subscribe { collection, kind } => {
                self.session.subscribe(collection, kind);
            },
            EngineAction::Set { request, path, value } => self.session.set(request, path, value),
            EngineAction::Push { request, collection, value } => {
                self.session.push(request, collection, value);
            },
            EngineAction::Fetch { request, path } => self.session.fetch(request, path),
            EngineAction::SignIn { request } => self.local.extend(self.auth.sign_in(request)),
            EngineAction::SignOut { request } => self.local.extend(self.auth.sign_out(request)),
            EngineAction::ScheduleFlush => {},
        }
    }

    /// Next event for the engine.
    pub fn next_event(&mut self) -> Option<EngineEvent> {
        self.local.pop_front().or_else(|| self.session.next_event())
    }

    /// Whether any event is waiting.
    pub fn has_pending(&self) -> bool {
        !self.local.is_empty() || self.session.has_pending()
    }
}
