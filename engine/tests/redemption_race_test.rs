//! Concurrency tests: at-most-once redemption under racing scanners.

#![allow(clippy::unwrap_used, clippy::panic)] // Tests fail loudly on unexpected results

use chrono::Utc;
use redemption_core::{
    ChangePublisher, ScanEvent, TicketCode, TicketState, TicketStore, Version,
};
use redemption_engine::{RedeemError, RedeemOutcome, RedemptionCoordinator, RetryPolicy};
use redemption_testing::{test_clock, CapturingPublisher, InMemoryTicketStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

fn coordinator_over(store: Arc<InMemoryTicketStore>) -> RedemptionCoordinator {
    RedemptionCoordinator::new(
        store,
        Arc::new(CapturingPublisher::new()) as Arc<dyn ChangePublisher>,
        Arc::new(test_clock()),
        RetryPolicy::builder()
            .max_retries(4)
            .initial_delay(Duration::from_millis(1))
            .build(),
    )
}

#[tokio::test]
async fn n_racing_devices_yield_exactly_one_success() {
    const DEVICES: usize = 16;

    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001"]));
    let coordinator = coordinator_over(Arc::clone(&store));
    let barrier = Arc::new(Barrier::new(DEVICES));

    let mut handles = Vec::with_capacity(DEVICES);
    for i in 0..DEVICES {
        let coordinator = coordinator.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let scan = ScanEvent::new("T-001", format!("dev-{i}"), 1_u64, Utc::now());
            barrier.wait().await;
            coordinator.redeem(&scan).await
        }));
    }

    let mut successes = 0;
    let mut already_redeemed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(RedeemOutcome::Redeemed { .. }) => successes += 1,
            Err(RedeemError::AlreadyRedeemed(_)) => already_redeemed += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(already_redeemed, DEVICES - 1);

    // Exactly one state change happened
    let ticket = store.get(&TicketCode::new("T-001")).await.unwrap();
    assert_eq!(ticket.state, TicketState::Redeemed);
    assert_eq!(ticket.version, Version::new(1));
}

#[tokio::test]
async fn two_devices_same_instant_end_to_end() {
    // Ticket "T-001" issued; devices A and B scan it within the same
    // instant: exactly one receives success, the other AlreadyRedeemed;
    // the store shows Redeemed with the version bumped by exactly 1.
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001"]));
    let coordinator = coordinator_over(Arc::clone(&store));
    let barrier = Arc::new(Barrier::new(2));

    let spawn_scan = |device: &str| {
        let coordinator = coordinator.clone();
        let barrier = Arc::clone(&barrier);
        let scan = ScanEvent::new("T-001", device, 1_u64, Utc::now());
        tokio::spawn(async move {
            barrier.wait().await;
            coordinator.redeem(&scan).await
        })
    };

    let a = spawn_scan("dev-a");
    let b = spawn_scan("dev-b");
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let success_count = [&a, &b].iter().filter(|r| r.is_ok()).count();
    let rejected_count = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(RedeemError::AlreadyRedeemed(_))))
        .count();
    assert_eq!(success_count, 1);
    assert_eq!(rejected_count, 1);

    let ticket = store.get(&TicketCode::new("T-001")).await.unwrap();
    assert_eq!(ticket.state, TicketState::Redeemed);
    assert_eq!(ticket.version, Version::INITIAL.next());
}

#[tokio::test]
async fn concurrent_redemptions_of_distinct_tickets_all_succeed() {
    const TICKETS: usize = 12;

    let codes: Vec<String> = (0..TICKETS).map(|i| format!("T-{i:03}")).collect();
    let store = Arc::new(InMemoryTicketStore::with_issued(codes.clone()));
    let coordinator = coordinator_over(Arc::clone(&store));

    let mut handles = Vec::new();
    for (i, code) in codes.iter().enumerate() {
        let coordinator = coordinator.clone();
        let scan = ScanEvent::new(code.as_str(), format!("dev-{i}"), 1_u64, Utc::now());
        handles.push(tokio::spawn(async move { coordinator.redeem(&scan).await }));
    }

    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Ok(RedeemOutcome::Redeemed { .. })
        ));
    }
}

#[tokio::test]
async fn replayed_scan_after_race_still_idempotent() {
    // The winning device retransmits its scan after the race settles (lost
    // acknowledgement); it must get the original success back.
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001"]));
    let coordinator = coordinator_over(store);

    let winning = ScanEvent::new("T-001", "dev-a", 1_u64, Utc::now());
    let outcome = coordinator.redeem(&winning).await.unwrap();
    assert!(matches!(outcome, RedeemOutcome::Redeemed { .. }));

    let losing = ScanEvent::new("T-001", "dev-b", 1_u64, Utc::now());
    assert!(matches!(
        coordinator.redeem(&losing).await,
        Err(RedeemError::AlreadyRedeemed(_))
    ));

    assert!(matches!(
        coordinator.redeem(&winning).await.unwrap(),
        RedeemOutcome::AlreadyApplied { .. }
    ));
}
