//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the engine loop from the concrete store
//! client and auth provider. Each platform implements the trait, while the
//! generic [`crate::Runtime`] handles all orchestration.

use std::future::Future;

use crate::{EngineAction, EngineInput};

/// Abstracts I/O operations for the engine runtime.
///
/// # Implementations
///
/// - **Production**: wraps the remote store client and the auth provider
/// - **Simulation**: an in-memory store with deterministic delivery
///
/// # Contract
///
/// Every [`EngineAction`] carrying a request id must eventually produce the
/// matching completion event through [`Driver::poll_input`]. Subscriptions
/// must deliver child events for their collection in key order.
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Wait for the next input.
    ///
    /// Returns `None` once no more input will arrive, which stops the
    /// runtime.
    fn poll_input(
        &mut self,
    ) -> impl Future<Output = Result<Option<EngineInput>, Self::Error>> + Send;

    /// Execute one store or auth action.
    ///
    /// [`EngineAction::ScheduleFlush`] never reaches the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be handed to the platform at
    /// all. Store-level failures are reported as completion events instead.
    fn execute(
        &mut self,
        action: EngineAction,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
