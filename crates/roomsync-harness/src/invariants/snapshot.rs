//! Observable state snapshots for invariant checking.

use roomsync_core::AppSnapshot;

/// Observable state of every simulated client.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(name: impl Into<String>, state: AppSnapshot) -> Self {
        Self { clients: vec![ClientSnapshot { name: name.into(), state }] }
    }

    /// Add a client.
    pub fn add_client(&mut self, name: impl Into<String>, state: AppSnapshot) {
        self.clients.push(ClientSnapshot { name: name.into(), state });
    }
}

/// One client's engine snapshot.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Client name, for reports.
    pub name: String,
    /// Engine state.
    pub state: AppSnapshot,
}
