//! Redemption coordinator - the only writer of ticket state.
//!
//! The coordinator accepts scan events and atomically transitions tickets
//! from `Issued` to `Redeemed` through the store's compare-and-swap,
//! guaranteeing at-most-once redemption under arbitrary scanner
//! concurrency:
//!
//! - Races on one ticket are resolved by the first conditional write to
//!   land; the loser re-reads, observes `Redeemed`, and deterministically
//!   receives [`RedeemError::AlreadyRedeemed`]
//! - Version conflicts are retried internally under a bounded
//!   [`RetryPolicy`] and never surface; exhaustion surfaces as the
//!   transient [`RedeemError::Contention`]
//! - An exact retransmission of a scan that already succeeded (same
//!   device and sequence number) returns the original success, giving
//!   callers a safe retry story after network ambiguity
//!
//! Redeeming ticket A never blocks on an in-flight redemption of ticket B;
//! contention is strictly per ticket.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use redemption_core::environment::Clock;
use redemption_core::store::{StoreError, TicketChange, TicketStore};
use redemption_core::{
    ChangeEvent, ChangePublisher, ScanEvent, TicketCode, TicketState, Version,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;

/// Errors surfaced by coordinator operations.
///
/// Everything except [`Contention`](Self::Contention) is permanent: the
/// answer will not change on retry. `Contention` is transient - the caller
/// may retry or treat it as a soft failure, but must never silently drop
/// the scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedeemError {
    /// No ticket with this code exists (or the code was empty).
    #[error("Unknown ticket: {0:?}")]
    UnknownTicket(TicketCode),

    /// The ticket was already redeemed by a different scan.
    #[error("Already redeemed: {0}")]
    AlreadyRedeemed(TicketCode),

    /// The ticket was administratively voided.
    #[error("Void ticket: {0}")]
    VoidTicket(TicketCode),

    /// Draw bookkeeping was requested on a ticket that is not redeemed.
    #[error("Ticket is not redeemed: {0}")]
    NotRedeemed(TicketCode),

    /// Transient failure: retries exhausted under contention, or the store
    /// backend was unreachable. Safe to retry.
    #[error("Contention on {code}: {reason}")]
    Contention {
        /// The ticket the operation targeted.
        code: TicketCode,
        /// What exhausted the attempt.
        reason: String,
    },
}

impl RedeemError {
    /// Whether this result is terminal for an offline-queue entry.
    ///
    /// Permanent rejections drain the entry (there is nothing left to
    /// retry); only transient contention keeps it queued.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Contention { .. })
    }

    fn contention(code: TicketCode, reason: impl Into<String>) -> Self {
        Self::Contention {
            code,
            reason: reason.into(),
        }
    }
}

/// Successful result of [`RedemptionCoordinator::redeem`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// This call performed the redemption.
    Redeemed {
        /// Ticket version after the transition.
        version: Version,
        /// Redemption timestamp (coordinator clock).
        redeemed_at: DateTime<Utc>,
    },
    /// The identical scan already succeeded earlier; this is the original
    /// outcome replayed, not a rejection.
    AlreadyApplied {
        /// Ticket version recorded by the original redemption.
        version: Version,
        /// Timestamp recorded by the original redemption.
        redeemed_at: Option<DateTime<Utc>>,
    },
}

/// Coordinates scan events against the ticket store.
///
/// Cheap to clone; clones share the same store, publisher, and clock.
#[derive(Clone)]
pub struct RedemptionCoordinator {
    store: Arc<dyn TicketStore>,
    publisher: Arc<dyn ChangePublisher>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl RedemptionCoordinator {
    /// Create a coordinator over the given store, publisher, and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        publisher: Arc<dyn ChangePublisher>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            retry,
        }
    }

    /// Attempt to redeem the ticket named by a scan event.
    ///
    /// See the module docs for the concurrency and idempotence guarantees.
    ///
    /// # Errors
    ///
    /// - [`RedeemError::UnknownTicket`] for empty or unknown codes
    /// - [`RedeemError::VoidTicket`] if the ticket was voided
    /// - [`RedeemError::AlreadyRedeemed`] if a *different* scan redeemed it
    /// - [`RedeemError::Contention`] after exhausting conflict retries or
    ///   on store backend failure
    pub async fn redeem(&self, scan: &ScanEvent) -> Result<RedeemOutcome, RedeemError> {
        if scan.ticket_code.is_empty() {
            return Err(RedeemError::UnknownTicket(scan.ticket_code.clone()));
        }

        let code = &scan.ticket_code;
        let mut attempt = 0;

        loop {
            let ticket = self.fetch(code).await?;

            match ticket.state {
                TicketState::Void => return Err(RedeemError::VoidTicket(code.clone())),
                TicketState::Redeemed => {
                    // Distinguish "this exact scan already succeeded" from
                    // "someone else got there": the former replays the
                    // original success for a safe retry story.
                    if ticket.redeemed_by_scan(&scan.device_id, scan.sequence_no) {
                        tracing::debug!(
                            ticket = %code,
                            device = %scan.device_id,
                            sequence = %scan.sequence_no,
                            "Idempotent replay of an applied scan"
                        );
                        return Ok(RedeemOutcome::AlreadyApplied {
                            version: ticket.version,
                            redeemed_at: ticket.redeemed_at,
                        });
                    }
                    return Err(RedeemError::AlreadyRedeemed(code.clone()));
                }
                TicketState::Issued => {}
            }

            let redeemed_at = self.clock.now();
            let change = TicketChange::Redeem {
                device_id: scan.device_id.clone(),
                sequence_no: scan.sequence_no,
                at: redeemed_at,
            };

            match self
                .store
                .compare_and_swap(code, ticket.version, change)
                .await
            {
                Ok(version) => {
                    tracing::info!(
                        ticket = %code,
                        device = %scan.device_id,
                        version = %version,
                        "Ticket redeemed"
                    );
                    self.notify(code, TicketState::Redeemed, version);
                    return Ok(RedeemOutcome::Redeemed {
                        version,
                        redeemed_at,
                    });
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    if attempt >= self.retry.max_retries {
                        tracing::warn!(
                            ticket = %code,
                            attempts = attempt + 1,
                            "Redemption retries exhausted"
                        );
                        return Err(RedeemError::contention(
                            code.clone(),
                            format!("version conflicts exhausted {} attempts", attempt + 1),
                        ));
                    }
                    tracing::debug!(
                        ticket = %code,
                        attempt,
                        actual = %actual,
                        "Version conflict, re-reading"
                    );
                    sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(StoreError::NotFound(c)) => return Err(RedeemError::UnknownTicket(c)),
                Err(e) => {
                    return Err(RedeemError::contention(code.clone(), e.to_string()));
                }
            }
        }
    }

    /// Administratively void a ticket.
    ///
    /// Valid from `Issued` or `Redeemed`; voiding an already-void ticket is
    /// a no-op returning the current version.
    ///
    /// # Errors
    ///
    /// - [`RedeemError::UnknownTicket`] if the code doesn't exist
    /// - [`RedeemError::Contention`] after exhausting conflict retries or
    ///   on store backend failure
    pub async fn void(&self, code: &TicketCode) -> Result<Version, RedeemError> {
        let (version, applied) = self
            .transition(code, |state| match state {
                TicketState::Void => Transition::Noop,
                TicketState::Issued | TicketState::Redeemed => {
                    Transition::Apply(TicketChange::Void)
                }
            })
            .await?;
        // The no-op path changed nothing; announcing it would push a
        // phantom change to every connected UI.
        if applied {
            self.notify(code, TicketState::Void, version);
            tracing::info!(ticket = %code, version = %version, "Ticket voided");
        }
        Ok(version)
    }

    /// Set or clear the draw bookkeeping flag on a redeemed ticket.
    ///
    /// # Errors
    ///
    /// - [`RedeemError::UnknownTicket`] if the code doesn't exist
    /// - [`RedeemError::VoidTicket`] / [`RedeemError::NotRedeemed`] if the
    ///   ticket left the redeemed state since the draw snapshot
    /// - [`RedeemError::Contention`] after exhausting conflict retries or
    ///   on store backend failure
    pub async fn set_drawn(&self, code: &TicketCode, flag: bool) -> Result<Version, RedeemError> {
        let (version, _) = self
            .transition(code, move |state| match state {
                TicketState::Redeemed => Transition::Apply(TicketChange::SetDrawn(flag)),
                TicketState::Void => Transition::Reject(RedeemError::VoidTicket(code.clone())),
                TicketState::Issued => Transition::Reject(RedeemError::NotRedeemed(code.clone())),
            })
            .await?;
        Ok(version)
    }

    /// Get-then-CAS loop shared by the administrative transitions.
    ///
    /// Returns the resulting version and whether a change was actually
    /// applied (`false` on the no-op path).
    async fn transition<F>(
        &self,
        code: &TicketCode,
        decide: F,
    ) -> Result<(Version, bool), RedeemError>
    where
        F: Fn(TicketState) -> Transition,
    {
        let mut attempt = 0;
        loop {
            let ticket = self.fetch(code).await?;

            let change = match decide(ticket.state) {
                Transition::Apply(change) => change,
                Transition::Noop => return Ok((ticket.version, false)),
                Transition::Reject(error) => return Err(error),
            };

            match self
                .store
                .compare_and_swap(code, ticket.version, change)
                .await
            {
                Ok(version) => return Ok((version, true)),
                Err(StoreError::VersionConflict { .. }) => {
                    if attempt >= self.retry.max_retries {
                        return Err(RedeemError::contention(
                            code.clone(),
                            format!("version conflicts exhausted {} attempts", attempt + 1),
                        ));
                    }
                    sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(StoreError::NotFound(c)) => return Err(RedeemError::UnknownTicket(c)),
                Err(e) => return Err(RedeemError::contention(code.clone(), e.to_string())),
            }
        }
    }

    async fn fetch(&self, code: &TicketCode) -> Result<redemption_core::Ticket, RedeemError> {
        match self.store.get(code).await {
            Ok(ticket) => Ok(ticket),
            Err(StoreError::NotFound(c)) => Err(RedeemError::UnknownTicket(c)),
            Err(e) => Err(RedeemError::contention(code.clone(), e.to_string())),
        }
    }

    /// Best-effort change notification. Failure is logged, never propagated:
    /// the store is ground truth and UIs reconcile against it.
    fn notify(&self, code: &TicketCode, new_state: TicketState, version: Version) {
        let event = ChangeEvent {
            ticket_code: code.clone(),
            new_state,
            version,
        };
        if let Err(e) = self.publisher.publish(event) {
            tracing::warn!(ticket = %code, error = %e, "Change notification dropped");
        }
    }
}

enum Transition {
    Apply(TicketChange),
    Noop,
    Reject(RedeemError),
}
