//! Change notification boundary.
//!
//! Every successful redemption emits a [`ChangeEvent`] so connected UIs can
//! reflect global state. Delivery is best-effort, not exactly-once:
//! consumers must tolerate duplicates and reordering and treat the ticket
//! store as ground truth on reconcile.
//!
//! # Implementations
//!
//! - `BroadcastChangeFeed` (in `redemption-engine`): `tokio::sync::broadcast`
//!   fan-out to connected devices
//! - `CapturingPublisher` (in `redemption-testing`): records events for
//!   assertions

use crate::ticket::{TicketCode, TicketState, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ticket-state change, pushed to connected devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The ticket that changed.
    pub ticket_code: TicketCode,
    /// Its new state.
    pub new_state: TicketState,
    /// The version after the change.
    pub version: Version,
}

/// Errors from the notification boundary.
///
/// Publish failures never fail the operation that produced the change; the
/// caller logs and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// No subscriber is currently connected.
    #[error("No connected subscribers")]
    NoSubscribers,

    /// Transport-level failure.
    #[error("Publish failed: {0}")]
    Transport(String),
}

/// Best-effort publisher of ticket-state changes.
///
/// Implementations must be `Send + Sync`. Publishing is synchronous and
/// non-blocking by contract - a publisher that needs async I/O should
/// buffer internally rather than block a redemption.
pub trait ChangePublisher: Send + Sync {
    /// Publish a change event to all connected consumers.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when delivery could not even be attempted.
    /// Callers treat any error as non-fatal.
    fn publish(&self, event: ChangeEvent) -> Result<(), PublishError>;
}
