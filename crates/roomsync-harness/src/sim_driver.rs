//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` runs the async [`roomsync_core::Runtime`] against the
//! in-memory store, so the same orchestration code that drives a real
//! platform backend is exercised deterministically.
//!
//! Inputs are drawn from the backend first and from the intent script only
//! once the backend is idle. Every scripted intent therefore sees the state
//! its predecessors settled into.

use std::collections::VecDeque;

use roomsync_core::{Driver, EngineAction, EngineInput, Intent, SyncError};
use roomsync_proto::Identity;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{backend::SimBackend, memory_store::MemoryStore, sim_auth::SimAuth};

/// Error type for simulation driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimDriverError {
    /// More inputs were delivered than the configured limit allows.
    #[error("step limit of {limit} inputs exceeded")]
    StepLimit {
        /// Configured limit
        limit: usize,
    },
}

/// Simulation driver for deterministic testing.
#[derive(Debug)]
pub struct SimDriver {
    backend: SimBackend,
    script: VecDeque<EngineInput>,
    executed: Vec<EngineAction>,
    delivered: usize,
    step_limit: Option<usize>,
}

impl SimDriver {
    /// Create a driver with its own session on `store`.
    pub fn new(store: &MemoryStore, account: Identity) -> Self {
        Self {
            backend: SimBackend::new(store.connect(), SimAuth::new(account)),
            script: VecDeque::new(),
            executed: Vec::new(),
            delivered: 0,
            step_limit: None,
        }
    }

    /// Fail once more than `limit` inputs have been delivered.
    #[must_use]
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Append an intent to the script, ignoring its outcome.
    pub fn queue(&mut self, intent: Intent) {
        self.script.push_back(intent.into());
    }

    /// Append an intent to the script and return its reply channel.
    pub fn queue_with_reply(
        &mut self,
        intent: Intent,
    ) -> oneshot::Receiver<Result<(), SyncError>> {
        let (reply, receiver) = oneshot::channel();
        self.script.push_back(EngineInput::Intent { intent, reply: Some(reply) });
        receiver
    }

    /// Every action handed to the driver, in order.
    pub fn executed(&self) -> &[EngineAction] {
        &self.executed
    }

    /// Number of inputs delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// The simulated backend.
    pub fn backend_mut(&mut self) -> &mut SimBackend {
        &mut self.backend
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn poll_input(&mut self) -> Result<Option<EngineInput>, Self::Error> {
        let next = match self.backend.next_event() {
            Some(event) => Some(EngineInput::Event(event)),
            None => self.script.pop_front(),
        };
        if next.is_some() {
            self.delivered += 1;
            if let Some(limit) = self.step_limit
                && self.delivered > limit
            {
                return Err(SimDriverError::StepLimit { limit });
            }
        }
        Ok(next)
    }

    async fn execute(&mut self, action: EngineAction) -> Result<(), Self::Error> {
        self.executed.push(action.clone());
        self.backend.execute(action);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use roomsync_core::{ChildEventKind, EngineEvent};

    use super::*;

    fn alice() -> Identity {
        Identity::new("alice", "Alice")
    }

    #[tokio::test]
    async fn backend_events_come_before_script() {
        let store = MemoryStore::new();
        store.put("rooms/r1", serde_json::json!({ "name": "general" }));

        let mut driver = SimDriver::new(&store, alice());
        driver.queue(Intent::DismissError);
        driver
            .execute(EngineAction::Subscribe {
                collection: roomsync_proto::StorePath::new("rooms"),
                kind: ChildEventKind::Added,
            })
            .await
            .unwrap();

        let first = driver.poll_input().await.unwrap();
        assert!(matches!(first, Some(EngineInput::Event(EngineEvent::ChildAdded { .. }))));
        let second = driver.poll_input().await.unwrap();
        assert!(matches!(second, Some(EngineInput::Intent { intent: Intent::DismissError, .. })));
        assert!(driver.poll_input().await.unwrap().is_none());
        assert_eq!(driver.delivered(), 2);
    }

    #[tokio::test]
    async fn step_limit_stops_delivery() {
        let store = MemoryStore::new();
        let mut driver = SimDriver::new(&store, alice()).with_step_limit(1);
        driver.queue(Intent::DismissError);
        driver.queue(Intent::DismissError);

        assert!(driver.poll_input().await.is_ok());
        let exceeded = driver.poll_input().await;
        assert!(matches!(exceeded, Err(SimDriverError::StepLimit { limit: 1 })));
    }
}
