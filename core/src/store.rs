//! Ticket store trait and related types.
//!
//! This module defines the contract for the single shared mutable resource
//! in the system: the durable, versioned ticket record set. All mutation
//! goes through [`TicketStore::compare_and_swap`] - a conditional write
//! that succeeds only if the stored version matches the version the caller
//! observed. Unconditional writes do not exist in this vocabulary, which is
//! what makes at-most-once redemption enforceable at the storage boundary.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `redemption-postgres`): production store,
//!   CAS as a conditional `UPDATE`
//! - `InMemoryTicketStore` (in `redemption-testing`): fast, deterministic
//!   testing
//!
//! # Visibility
//!
//! The store guarantees read-your-writes for the process that performed a
//! swap; propagation to other devices is the sync layer's concern and is
//! best-effort.

use crate::draw::DrawRecord;
use crate::ticket::{DeviceId, SequenceNo, Ticket, TicketCode, Version};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future type returned by store operations.
///
/// Explicit `Pin<Box<dyn Future>>` instead of `async fn` keeps the trait
/// dyn-compatible (`Arc<dyn TicketStore>`), which the coordinator and draw
/// engine rely on.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during ticket store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No ticket with the given code exists.
    #[error("Ticket not found: {0}")]
    NotFound(TicketCode),

    /// Optimistic concurrency conflict: expected version doesn't match the
    /// stored version. Another writer got there first; re-read and retry.
    #[error("Version conflict on {code}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The ticket where the conflict occurred.
        code: TicketCode,
        /// The version the caller expected.
        expected: Version,
        /// The actual stored version.
        actual: Version,
    },

    /// A ticket with this code already exists (issuance only).
    #[error("Ticket already exists: {0}")]
    Duplicate(TicketCode),

    /// No draw record with the given ID exists.
    #[error("Draw record not found: {0}")]
    DrawNotFound(Uuid),

    /// Backend or transport failure (connection loss, query error).
    /// Transient from the caller's perspective.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error is a transient backend failure worth retrying,
    /// as opposed to a definitive answer about the data.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// The closed vocabulary of ticket mutations.
///
/// Only these transitions exist; every one is applied via
/// [`TicketStore::compare_and_swap`] and bumps the version by exactly 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TicketChange {
    /// `Issued → Redeemed`, recording who scanned it and when.
    Redeem {
        /// Device performing the redemption.
        device_id: DeviceId,
        /// The scan's per-device sequence number.
        sequence_no: SequenceNo,
        /// Redemption timestamp (coordinator clock).
        at: DateTime<Utc>,
    },
    /// Administrative void. Valid from `Issued` or `Redeemed`.
    Void,
    /// Set or clear the draw bookkeeping flag. Valid only on `Redeemed`.
    SetDrawn(bool),
}

/// Durable, versioned ticket record set - the source of truth for
/// redemption state.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; many scanner devices act as
/// concurrent clients of one store.
///
/// # Contract
///
/// - [`compare_and_swap`](Self::compare_and_swap) is the *sole* mutation
///   path for ticket state; callers must retry on
///   [`StoreError::VersionConflict`]
/// - `version`, `last_scan`, and `drawn` survive process restarts
/// - [`eligible_pool`](Self::eligible_pool) returns a consistent ordered
///   snapshot; redemptions landing after the snapshot simply aren't in it
/// - Draw records are append-only and immutable once written
pub trait TicketStore: Send + Sync {
    /// Fetch a ticket by code.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no such ticket exists
    /// - [`StoreError::Backend`] on storage failure
    fn get(&self, code: &TicketCode) -> StoreFuture<'_, Ticket>;

    /// Conditionally apply a [`TicketChange`], succeeding only if the
    /// stored version equals `expected_version`.
    ///
    /// Returns the new version (always `expected_version + 1`).
    ///
    /// The swap is the system's single atomic boundary: a ticket is either
    /// fully at the old state or fully at the new one, never in between,
    /// even under crash.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no such ticket exists
    /// - [`StoreError::VersionConflict`] if another writer won the race
    /// - [`StoreError::Backend`] on storage failure
    fn compare_and_swap(
        &self,
        code: &TicketCode,
        expected_version: Version,
        change: TicketChange,
    ) -> StoreFuture<'_, Version>;

    /// Insert a freshly issued ticket.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] if the code is already present
    /// - [`StoreError::Backend`] on storage failure
    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, ()>;

    /// Ordered snapshot of codes eligible for a draw: state `Redeemed`,
    /// not previously drawn. Ordering is stable (by code) so a recorded
    /// pool is reproducible.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Backend`] on storage failure
    fn eligible_pool(&self) -> StoreFuture<'_, Vec<TicketCode>>;

    /// Persist an immutable draw record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Backend`] on storage failure
    fn record_draw(&self, record: &DrawRecord) -> StoreFuture<'_, ()>;

    /// Load a previously recorded draw.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DrawNotFound`] if no such draw exists
    /// - [`StoreError::Backend`] on storage failure
    fn load_draw(&self, draw_id: Uuid) -> StoreFuture<'_, DrawRecord>;
}
