//! Offline queue replay: strict per-device order across transient failures
//! and process restarts.

#![allow(clippy::unwrap_used)] // Tests fail loudly on unexpected results

use chrono::Utc;
use redemption_core::{
    ChangePublisher, ScanEvent, TicketCode, TicketState, TicketStore,
};
use redemption_core::DeviceId;
use redemption_engine::{
    OfflineScanQueue, QueueError, RedeemError, RedemptionCoordinator, RetryPolicy,
};
use redemption_testing::{test_clock, CapturingPublisher, FlakyStore, InMemoryTicketStore};
use std::sync::Arc;
use std::time::Duration;

fn coordinator_over(store: Arc<dyn TicketStore>) -> RedemptionCoordinator {
    RedemptionCoordinator::new(
        store,
        Arc::new(CapturingPublisher::new()) as Arc<dyn ChangePublisher>,
        Arc::new(test_clock()),
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build(),
    )
}

fn scan(device: &str, seq: u64, code: &str) -> ScanEvent {
    ScanEvent::new(code, device, seq, Utc::now())
}

#[tokio::test]
async fn transient_failure_on_middle_entry_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let inner = Arc::new(InMemoryTicketStore::with_issued(["T-001", "T-002", "T-003"]));
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&inner) as Arc<dyn TicketStore>));
    let coordinator = coordinator_over(Arc::clone(&flaky) as Arc<dyn TicketStore>);

    let mut queue = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a"))
        .await
        .unwrap();
    queue.enqueue(scan("dev-a", 1, "T-001")).await.unwrap();
    queue.enqueue(scan("dev-a", 2, "T-002")).await.unwrap();
    queue.enqueue(scan("dev-a", 3, "T-003")).await.unwrap();

    // B (T-002) fails transiently on first contact
    flaky.fail_gets_for(TicketCode::new("T-002"), 1);

    let report = queue.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.remaining, 2);
    assert!(matches!(
        report.stopped_on,
        Some(RedeemError::Contention { .. })
    ));

    // C was never replayed ahead of the stuck B
    let t3 = inner.get(&TicketCode::new("T-003")).await.unwrap();
    assert_eq!(t3.state, TicketState::Issued);

    // Next pass drains B then C, in order
    let report = queue.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 2);
    assert_eq!(report.remaining, 0);
    assert!(queue.is_empty());

    for code in ["T-001", "T-002", "T-003"] {
        let ticket = inner.get(&TicketCode::new(code)).await.unwrap();
        assert_eq!(ticket.state, TicketState::Redeemed, "{code}");
    }
}

#[tokio::test]
async fn permanent_rejections_drain_their_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001", "T-003"]));
    let coordinator = coordinator_over(Arc::clone(&store) as Arc<dyn TicketStore>);

    let mut queue = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a"))
        .await
        .unwrap();
    queue.enqueue(scan("dev-a", 1, "T-001")).await.unwrap();
    queue.enqueue(scan("dev-a", 2, "T-404")).await.unwrap(); // unknown ticket
    queue.enqueue(scan("dev-a", 3, "T-003")).await.unwrap();

    let report = queue.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.stopped_on, None);
}

#[tokio::test]
async fn pending_entries_survive_restart_and_replay_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001", "T-002"]));
    let coordinator = coordinator_over(Arc::clone(&store) as Arc<dyn TicketStore>);
    let device = DeviceId::new("dev-a");

    // Scans captured, then the process dies before any replay
    {
        let mut queue = OfflineScanQueue::open(dir.path(), device.clone())
            .await
            .unwrap();
        queue.enqueue(scan("dev-a", 1, "T-001")).await.unwrap();
        queue.enqueue(scan("dev-a", 2, "T-002")).await.unwrap();
    }

    // Restart: queue reloads from disk and replays
    let mut queue = OfflineScanQueue::open(dir.path(), device.clone())
        .await
        .unwrap();
    assert_eq!(queue.pending(), 2);
    let report = queue.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 2);

    // A second restart from a stale copy of the log (crash before
    // compaction) re-presents both scans; idempotence answers them as
    // accepted, not rejected.
    let mut stale = OfflineScanQueue::open(dir.path(), device).await.unwrap();
    assert!(stale.is_empty()); // compaction already ran
    stale.enqueue(scan("dev-a", 3, "T-001")).await.unwrap(); // genuinely new duplicate scan
    let report = stale.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(report.rejected, 1); // new scan of a redeemed ticket is rejected
}

#[tokio::test]
async fn sequence_regression_after_drain_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001", "T-002"]));
    let coordinator = coordinator_over(Arc::clone(&store) as Arc<dyn TicketStore>);

    let mut queue = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a"))
        .await
        .unwrap();
    queue.enqueue(scan("dev-a", 5, "T-001")).await.unwrap();
    let report = queue.replay(&coordinator).await.unwrap();
    assert_eq!(report.accepted, 1);
    assert!(queue.is_empty());

    // The watermark outlives the drained backlog: sequence 3 already lies
    // behind the replayed sequence 5.
    let result = queue.enqueue(scan("dev-a", 3, "T-002")).await;
    assert!(matches!(result, Err(QueueError::OutOfOrder { .. })));
    assert!(queue.is_empty());

    // The next genuinely new capture is accepted
    queue.enqueue(scan("dev-a", 6, "T-002")).await.unwrap();
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn direct_replay_of_recorded_scan_returns_original_success() {
    let store = Arc::new(InMemoryTicketStore::with_issued(["T-001"]));
    let coordinator = coordinator_over(Arc::clone(&store) as Arc<dyn TicketStore>);

    let event = scan("dev-a", 1, "T-001");
    assert!(coordinator.redeem(&event).await.is_ok());
    // The exact same queued entry presented again (e.g. crash between
    // replay and compaction) is accepted, not rejected.
    assert!(coordinator.redeem(&event).await.is_ok());
}
