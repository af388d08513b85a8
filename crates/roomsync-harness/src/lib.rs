//! Deterministic simulation harness for roomsync engine testing.
//!
//! Every collaborator the engine talks to is simulated in-process: a shared
//! [`MemoryStore`] with per-session delivery queues and fault injection, and
//! a [`SimAuth`] provider with one fixed account. Delivery is explicit, so a
//! test decides exactly which client observes which write, and when.
//!
//! # Clients
//!
//! - [`SimClient`]: synchronous, one engine per client, stepped by hand
//! - [`SimDriver`]: implements [`roomsync_core::Driver`] so the async
//!   [`roomsync_core::Runtime`] runs against the same store
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold whatever order
//! notifications arrived in. Use [`InvariantRegistry::standard()`] after any
//! tick and [`InvariantRegistry::settled()`] once every queue is drained.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod faults;
pub mod invariants;
pub mod memory_store;
pub mod sim_auth;
pub mod sim_client;
pub mod sim_driver;

pub use backend::SimBackend;
pub use faults::{FaultKind, FaultOp, FaultPlan, FaultRule};
pub use invariants::{
    ClientSnapshot, Invariant, InvariantRegistry, InvariantResult, SystemSnapshot, Violation,
};
pub use memory_store::{MemoryStore, OpKind, OpRecord, StoreSession};
pub use sim_auth::SimAuth;
pub use sim_client::{SimClient, settle, settle_shuffled};
pub use sim_driver::{SimDriver, SimDriverError};

/// Snapshot every client for invariant checking.
pub fn system_snapshot(clients: &[&SimClient]) -> SystemSnapshot {
    let mut snapshot = SystemSnapshot::empty();
    for client in clients {
        snapshot.add_client(client.name(), client.snapshot());
    }
    snapshot
}
