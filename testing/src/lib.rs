//! # Redemption Testing
//!
//! Testing utilities for the redemption engine workspace.
//!
//! This crate provides:
//! - [`InMemoryTicketStore`]: fast, deterministic [`TicketStore`] for tests
//! - [`FlakyStore`]: fault-injecting store wrapper for transient-failure
//!   scenarios
//! - [`CapturingPublisher`]: records published change events for assertions
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use redemption_testing::{test_clock, InMemoryTicketStore};
//! use redemption_core::{Ticket, TicketCode, TicketStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryTicketStore::new();
//! store.insert(Ticket::issued(TicketCode::new("T-001"))).await.unwrap();
//! let ticket = store.get(&TicketCode::new("T-001")).await.unwrap();
//! assert_eq!(ticket.code, TicketCode::new("T-001"));
//! # }
//! ```

pub mod store;

use chrono::{DateTime, Utc};
use redemption_core::environment::Clock;
use redemption_core::{ChangeEvent, ChangePublisher, PublishError};
use std::sync::{Mutex, PoisonError};

pub use store::{FlakyStore, InMemoryTicketStore};

// Re-export for doctests and downstream test convenience
pub use redemption_core::TicketStore;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making timestamps reproducible.
///
/// # Example
///
/// ```
/// use redemption_testing::FixedClock;
/// use redemption_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-06-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen
/// in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Change publisher that records every published event.
///
/// Use [`events`](Self::events) to assert on what a redemption emitted.
#[derive(Debug, Default)]
pub struct CapturingPublisher {
    events: Mutex<Vec<ChangeEvent>>,
}

impl CapturingPublisher {
    /// Create an empty capturing publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been published yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChangePublisher for CapturingPublisher {
    fn publish(&self, event: ChangeEvent) -> Result<(), PublishError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
