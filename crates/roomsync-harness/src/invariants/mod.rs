//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold after every tick, whatever order
//! notifications arrived in. Each client's observable state is captured in a
//! [`SystemSnapshot`] and every registered [`Invariant`] is run against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::single("alice", engine.snapshot());
//! registry.assert_all(&snapshot, "after settle");
//! ```

mod checks;
mod snapshot;

pub use checks::{RoomSetConvergence, SelectedRoomInRooms, UniqueMessageIds, UniqueRoomIds};
pub use snapshot::{ClientSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against system state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the invariants that hold after every tick.
    ///
    /// Includes:
    /// - [`SelectedRoomInRooms`]: the selection names a known room
    /// - [`UniqueRoomIds`]: no room appears twice
    /// - [`UniqueMessageIds`]: no message appears twice in a room
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SelectedRoomInRooms);
        registry.add(UniqueRoomIds);
        registry.add(UniqueMessageIds);
        registry
    }

    /// Standard invariants plus those that only hold once every client's
    /// queue is drained.
    pub fn settled() -> Self {
        let mut registry = Self::standard();
        registry.add(RoomSetConvergence);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
