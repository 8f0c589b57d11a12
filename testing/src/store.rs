//! In-memory ticket store and fault-injection wrapper.

use redemption_core::store::{StoreError, StoreFuture, TicketChange, TicketStore};
use redemption_core::{DrawRecord, Ticket, TicketCode, TicketState, Version};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    tickets: BTreeMap<TicketCode, Ticket>,
    draws: HashMap<Uuid, DrawRecord>,
}

/// In-memory [`TicketStore`] for fast, deterministic tests.
///
/// Semantics match the production store: compare-and-swap is atomic (one
/// mutex acquisition), versions bump by exactly 1, and the eligible pool
/// is ordered by code.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    inner: Mutex<Inner>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with issued tickets for the given codes.
    #[must_use]
    pub fn with_issued<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<TicketCode>,
    {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for code in codes {
                let ticket = Ticket::issued(code.into());
                inner.tickets.insert(ticket.code.clone(), ticket);
            }
        }
        store
    }

    /// Number of tickets currently stored.
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.lock().tickets.len()
    }

    /// Number of draw records currently stored.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.lock().draws.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(ticket: &mut Ticket, change: TicketChange) {
        match change {
            TicketChange::Redeem {
                device_id,
                sequence_no,
                at,
            } => {
                ticket.state = TicketState::Redeemed;
                ticket.redeemed_by = Some(device_id.clone());
                ticket.redeemed_at = Some(at);
                ticket.last_scan = Some((device_id, sequence_no));
            }
            TicketChange::Void => {
                ticket.state = TicketState::Void;
            }
            TicketChange::SetDrawn(flag) => {
                ticket.drawn = flag;
            }
        }
        ticket.version = ticket.version.next();
    }
}

impl TicketStore for InMemoryTicketStore {
    fn get(&self, code: &TicketCode) -> StoreFuture<'_, Ticket> {
        let result = {
            let inner = self.lock();
            inner
                .tickets
                .get(code)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(code.clone()))
        };
        Box::pin(async move { result })
    }

    fn compare_and_swap(
        &self,
        code: &TicketCode,
        expected_version: Version,
        change: TicketChange,
    ) -> StoreFuture<'_, Version> {
        let result = {
            let mut inner = self.lock();
            match inner.tickets.get_mut(code) {
                None => Err(StoreError::NotFound(code.clone())),
                Some(ticket) if ticket.version != expected_version => {
                    Err(StoreError::VersionConflict {
                        code: code.clone(),
                        expected: expected_version,
                        actual: ticket.version,
                    })
                }
                Some(ticket) => {
                    Self::apply(ticket, change);
                    Ok(ticket.version)
                }
            }
        };
        Box::pin(async move { result })
    }

    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, ()> {
        let result = {
            let mut inner = self.lock();
            if inner.tickets.contains_key(&ticket.code) {
                Err(StoreError::Duplicate(ticket.code))
            } else {
                inner.tickets.insert(ticket.code.clone(), ticket);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn eligible_pool(&self) -> StoreFuture<'_, Vec<TicketCode>> {
        let pool: Vec<TicketCode> = {
            let inner = self.lock();
            inner
                .tickets
                .values()
                .filter(|t| t.is_draw_eligible())
                .map(|t| t.code.clone())
                .collect()
        };
        Box::pin(async move { Ok(pool) })
    }

    fn record_draw(&self, record: &DrawRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        let result = {
            let mut inner = self.lock();
            inner.draws.insert(record.draw_id, record);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn load_draw(&self, draw_id: Uuid) -> StoreFuture<'_, DrawRecord> {
        let result = {
            let inner = self.lock();
            inner
                .draws
                .get(&draw_id)
                .cloned()
                .ok_or(StoreError::DrawNotFound(draw_id))
        };
        Box::pin(async move { result })
    }
}

/// Fault-injecting wrapper around another [`TicketStore`].
///
/// Scripted backend failures let tests exercise the transient-error paths:
/// the next N `get` or `compare_and_swap` calls - globally or for one
/// specific ticket - fail with [`StoreError::Backend`] before the wrapper
/// passes calls through again.
pub struct FlakyStore {
    inner: Arc<dyn TicketStore>,
    fail_gets: AtomicUsize,
    fail_swaps: AtomicUsize,
    fail_gets_for: Mutex<HashMap<TicketCode, usize>>,
}

impl FlakyStore {
    /// Wrap a store with no failures scripted.
    #[must_use]
    pub fn new(inner: Arc<dyn TicketStore>) -> Self {
        Self {
            inner,
            fail_gets: AtomicUsize::new(0),
            fail_swaps: AtomicUsize::new(0),
            fail_gets_for: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `count` calls to `get` fail with a backend error.
    pub fn fail_next_gets(&self, count: usize) {
        self.fail_gets.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `compare_and_swap` fail with a
    /// backend error.
    pub fn fail_next_swaps(&self, count: usize) {
        self.fail_swaps.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `get` *for this ticket* fail with a
    /// backend error; other tickets pass through.
    pub fn fail_gets_for(&self, code: TicketCode, count: usize) {
        self.fail_gets_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code, count);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_failure_for(&self, code: &TicketCode) -> bool {
        let mut map = self
            .fail_gets_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(code) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl TicketStore for FlakyStore {
    fn get(&self, code: &TicketCode) -> StoreFuture<'_, Ticket> {
        if Self::take_failure(&self.fail_gets) || self.take_failure_for(code) {
            return Box::pin(async { Err(StoreError::Backend("injected get failure".to_string())) });
        }
        self.inner.get(code)
    }

    fn compare_and_swap(
        &self,
        code: &TicketCode,
        expected_version: Version,
        change: TicketChange,
    ) -> StoreFuture<'_, Version> {
        if Self::take_failure(&self.fail_swaps) {
            return Box::pin(async {
                Err(StoreError::Backend("injected swap failure".to_string()))
            });
        }
        self.inner.compare_and_swap(code, expected_version, change)
    }

    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, ()> {
        self.inner.insert(ticket)
    }

    fn eligible_pool(&self) -> StoreFuture<'_, Vec<TicketCode>> {
        self.inner.eligible_pool()
    }

    fn record_draw(&self, record: &DrawRecord) -> StoreFuture<'_, ()> {
        self.inner.record_draw(record)
    }

    fn load_draw(&self, draw_id: Uuid) -> StoreFuture<'_, DrawRecord> {
        self.inner.load_draw(draw_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests fail loudly on unexpected results
mod tests {
    use super::*;
    use chrono::Utc;
    use redemption_core::{DeviceId, SequenceNo};

    fn redeem_change() -> TicketChange {
        TicketChange::Redeem {
            device_id: DeviceId::new("dev-a"),
            sequence_no: SequenceNo::new(1),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_unknown_code_is_not_found() {
        let store = InMemoryTicketStore::new();
        let result = store.get(&TicketCode::new("T-404")).await;
        assert_eq!(result, Err(StoreError::NotFound(TicketCode::new("T-404"))));
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = InMemoryTicketStore::new();
        let ticket = Ticket::issued(TicketCode::new("T-001"));
        assert!(store.insert(ticket.clone()).await.is_ok());
        assert_eq!(
            store.insert(ticket).await,
            Err(StoreError::Duplicate(TicketCode::new("T-001")))
        );
    }

    #[tokio::test]
    async fn cas_bumps_version_by_one() {
        let store = InMemoryTicketStore::with_issued(["T-001"]);
        let code = TicketCode::new("T-001");

        let new_version = store
            .compare_and_swap(&code, Version::INITIAL, redeem_change())
            .await
            .unwrap();
        assert_eq!(new_version, Version::new(1));

        let ticket = store.get(&code).await.unwrap();
        assert_eq!(ticket.state, TicketState::Redeemed);
        assert_eq!(ticket.version, Version::new(1));
        assert_eq!(
            ticket.last_scan,
            Some((DeviceId::new("dev-a"), SequenceNo::new(1)))
        );
    }

    #[tokio::test]
    async fn cas_with_stale_version_conflicts() {
        let store = InMemoryTicketStore::with_issued(["T-001"]);
        let code = TicketCode::new("T-001");

        store
            .compare_and_swap(&code, Version::INITIAL, redeem_change())
            .await
            .unwrap();

        // Second writer still holds version 0
        let result = store
            .compare_and_swap(&code, Version::INITIAL, redeem_change())
            .await;
        assert_eq!(
            result,
            Err(StoreError::VersionConflict {
                code,
                expected: Version::INITIAL,
                actual: Version::new(1),
            })
        );
    }

    #[tokio::test]
    async fn eligible_pool_is_ordered_and_filtered() {
        let store = InMemoryTicketStore::with_issued(["T-003", "T-001", "T-002"]);

        for code in ["T-001", "T-003"] {
            store
                .compare_and_swap(&TicketCode::new(code), Version::INITIAL, redeem_change())
                .await
                .unwrap();
        }

        let pool = store.eligible_pool().await.unwrap();
        assert_eq!(pool, vec![TicketCode::new("T-001"), TicketCode::new("T-003")]);

        // Flag one as drawn; it leaves the pool
        store
            .compare_and_swap(
                &TicketCode::new("T-001"),
                Version::new(1),
                TicketChange::SetDrawn(true),
            )
            .await
            .unwrap();
        let pool = store.eligible_pool().await.unwrap();
        assert_eq!(pool, vec![TicketCode::new("T-003")]);
    }

    #[tokio::test]
    async fn flaky_store_fails_then_recovers() {
        let inner = Arc::new(InMemoryTicketStore::with_issued(["T-001"]));
        let flaky = FlakyStore::new(inner);
        flaky.fail_next_gets(2);

        let code = TicketCode::new("T-001");
        assert!(matches!(
            flaky.get(&code).await,
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            flaky.get(&code).await,
            Err(StoreError::Backend(_))
        ));
        assert!(flaky.get(&code).await.is_ok());
    }
}
