//! # Redemption Core
//!
//! Core types and contracts for the ticket redemption and draw engine.
//!
//! This crate defines the domain model shared by every other crate in the
//! workspace:
//!
//! - **Tickets**: versioned records with an `Issued → Redeemed` lifecycle
//! - **Scan events**: decoded barcode reads from handheld scanner devices
//! - **Draw records**: immutable, reproducible lottery-draw artifacts
//! - **Ticket store**: the compare-and-swap contract every backing store
//!   must honor
//! - **Change publisher**: the best-effort notification boundary consumed
//!   by UIs
//!
//! ## Architecture Principles
//!
//! - The ticket store is the single shared mutable resource; all mutation
//!   goes through compare-and-swap with a per-ticket version token
//! - No component other than the coordinator writes ticket state
//! - Draws read a snapshot and write immutable records; they never mutate
//!   tickets directly
//! - All external dependencies (time, storage, notification) are abstracted
//!   behind traits and injected

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod draw;
pub mod scan;
pub mod store;
pub mod sync;
pub mod ticket;

pub use draw::DrawRecord;
pub use scan::ScanEvent;
pub use store::{StoreError, TicketChange, TicketStore};
pub use sync::{ChangeEvent, ChangePublisher, PublishError};
pub use ticket::{DeviceId, SequenceNo, Ticket, TicketCode, TicketState, Version};

/// Environment traits - injected dependencies for testability.
///
/// All ambient capabilities (currently: time) are abstracted behind traits
/// so the engine can run deterministically under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// Production code uses [`SystemClock`]; tests use a fixed clock from
    /// the testing crate so timestamps are deterministic.
    pub trait Clock: Send + Sync {
        /// Get the current time.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time source.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
