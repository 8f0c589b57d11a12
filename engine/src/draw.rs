//! Seeded, reproducible draw engine.
//!
//! Winners are selected by a Fisher-Yates shuffle of the eligible pool
//! driven by a `ChaCha8` generator seeded from the recorded seed, then
//! taking the first `count` entries. Identical `(pool order, count, seed)`
//! always yield identical winners, which is what makes a recorded draw
//! auditable: anyone can recompute the shuffle and check the result.
//!
//! The engine never mutates ticket state directly. After the record is
//! persisted it asks the coordinator to flag each winner as drawn;
//! failures there are reported and logged but never roll the draw back -
//! winners already announced stay selected.

use crate::coordinator::{RedeemError, RedemptionCoordinator};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use redemption_core::environment::Clock;
use redemption_core::store::{StoreError, TicketStore};
use redemption_core::{DrawRecord, TicketCode};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from draw operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrawError {
    /// More winners requested than the eligible pool holds. No record is
    /// written.
    #[error("Insufficient pool: requested {requested} winners from {available} eligible tickets")]
    InsufficientPool {
        /// Winners requested.
        requested: usize,
        /// Pool size at snapshot time.
        available: usize,
    },

    /// The store failed while snapshotting the pool or persisting the
    /// record.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a completed draw.
///
/// `flag_failures` lists winners whose `drawn` bookkeeping flag could not
/// be set; the draw itself remains valid regardless.
#[derive(Clone, Debug)]
pub struct DrawOutcome {
    /// The persisted, immutable record.
    pub record: DrawRecord,
    /// Winners whose bookkeeping flag failed, with the failure.
    pub flag_failures: Vec<(TicketCode, RedeemError)>,
}

/// Selects draw winners from the redeemed-ticket pool.
#[derive(Clone)]
pub struct DrawEngine {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl DrawEngine {
    /// Create a draw engine over the given store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Pure winner selection: seeded Fisher-Yates shuffle of `pool`, first
    /// `count` taken, without replacement.
    ///
    /// Exposed so audits and tests can recompute a draw from its recorded
    /// inputs.
    #[must_use]
    pub fn winners_for(pool: &[TicketCode], count: usize, seed: u64) -> Vec<TicketCode> {
        let mut shuffled = pool.to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);
        shuffled.truncate(count);
        shuffled
    }

    /// Run a draw: snapshot the eligible pool, select `count` winners, and
    /// persist the record.
    ///
    /// If `seed` is omitted one is generated and recorded, so the draw
    /// stays reproducible after the fact. Redemptions landing after the
    /// snapshot are simply not in this draw's pool; no store-wide lock is
    /// taken.
    ///
    /// The record is persisted *before* winner bookkeeping. Each winner is
    /// then flagged drawn through the coordinator; individual failures are
    /// collected in the outcome, logged, and never rolled back.
    ///
    /// # Errors
    ///
    /// - [`DrawError::InsufficientPool`] if `count` exceeds the pool size
    ///   (nothing is persisted)
    /// - [`DrawError::Store`] if the snapshot or record write fails
    pub async fn draw(
        &self,
        coordinator: &RedemptionCoordinator,
        count: usize,
        seed: Option<u64>,
    ) -> Result<DrawOutcome, DrawError> {
        let pool = self.store.eligible_pool().await?;
        if count > pool.len() {
            return Err(DrawError::InsufficientPool {
                requested: count,
                available: pool.len(),
            });
        }

        let seed = seed.unwrap_or_else(rand::random);
        let winners = Self::winners_for(&pool, count, seed);

        let record = DrawRecord {
            draw_id: Uuid::new_v4(),
            seed,
            eligible_pool: pool,
            winners,
            created_at: self.clock.now(),
        };
        self.store.record_draw(&record).await?;

        tracing::info!(
            draw_id = %record.draw_id,
            seed = record.seed,
            pool = record.eligible_pool.len(),
            winners = record.winners.len(),
            "Draw recorded"
        );

        let flag_failures = self.flag_winners(coordinator, &record.winners, true).await;

        Ok(DrawOutcome {
            record,
            flag_failures,
        })
    }

    /// Cancel a draw's bookkeeping: clear the `drawn` flag on its winners
    /// so they return to the eligible pool for future draws.
    ///
    /// The [`DrawRecord`] itself is immutable and stays persisted - what
    /// happened, happened. Returns the per-winner failures, if any.
    pub async fn cancel(
        &self,
        coordinator: &RedemptionCoordinator,
        record: &DrawRecord,
    ) -> Vec<(TicketCode, RedeemError)> {
        tracing::info!(draw_id = %record.draw_id, "Cancelling draw bookkeeping");
        self.flag_winners(coordinator, &record.winners, false).await
    }

    /// Recompute the shuffle from the record's inputs and check the
    /// recorded winners match. An audit/dispute tool.
    #[must_use]
    pub fn verify(record: &DrawRecord) -> bool {
        Self::winners_for(&record.eligible_pool, record.winners.len(), record.seed)
            == record.winners
    }

    async fn flag_winners(
        &self,
        coordinator: &RedemptionCoordinator,
        winners: &[TicketCode],
        flag: bool,
    ) -> Vec<(TicketCode, RedeemError)> {
        let mut failures = Vec::new();
        for code in winners {
            if let Err(e) = coordinator.set_drawn(code, flag).await {
                tracing::warn!(
                    ticket = %code,
                    flag,
                    error = %e,
                    "Draw bookkeeping failed for winner"
                );
                failures.push((code.clone(), e));
            }
        }
        failures
    }
}
