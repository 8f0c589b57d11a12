//! Per-device durable offline scan queue.
//!
//! Scans captured without connectivity land in an append-only per-device
//! log (one JSON-lines file per device) and are replayed against the
//! coordinator strictly in capture order once connectivity resumes.
//!
//! # Replay semantics
//!
//! - Terminal results (`Redeemed`, `AlreadyApplied`, `AlreadyRedeemed`,
//!   `UnknownTicket`, `VoidTicket`) drain the entry - there is nothing
//!   left to retry
//! - Transient `Contention` stops the replay with the failed entry and
//!   everything behind it still queued; later entries are never replayed
//!   ahead of a pending earlier one
//! - The log is compacted after replay; a crash between replay and
//!   compaction re-presents already-applied scans, which the coordinator's
//!   idempotence rule answers with the original success

use crate::coordinator::{RedeemError, RedemptionCoordinator};
use redemption_core::{DeviceId, ScanEvent, SequenceNo};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors from offline queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Filesystem failure reading or writing the log.
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line failed to parse or violated the per-device ordering
    /// invariant on load.
    #[error("Corrupt queue log at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number in the log file.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A scan for a different device was offered to this queue.
    #[error("Scan for device {got} enqueued on queue for {expected}")]
    WrongDevice {
        /// The queue's device.
        expected: DeviceId,
        /// The scan's device.
        got: DeviceId,
    },

    /// Sequence numbers must be strictly increasing per device.
    #[error("Out-of-order scan for {device}: sequence {got} after {last}")]
    OutOfOrder {
        /// The queue's device.
        device: DeviceId,
        /// Highest sequence number already enqueued.
        last: SequenceNo,
        /// The offending sequence number.
        got: SequenceNo,
    },
}

/// Result of one [`OfflineScanQueue::replay`] pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries the coordinator accepted (redeemed or idempotent replay).
    pub accepted: usize,
    /// Entries definitively rejected (unknown, void, already redeemed).
    pub rejected: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
    /// The transient failure that stopped the pass, if any.
    pub stopped_on: Option<RedeemError>,
}

/// Durable, ordered backlog of scans for one device.
///
/// Not `Sync`: a queue belongs to one device's scanning loop. Concurrency
/// in this system lives between devices, not within one.
#[derive(Debug)]
pub struct OfflineScanQueue {
    device_id: DeviceId,
    path: PathBuf,
    entries: VecDeque<ScanEvent>,
    // Highest sequence number this queue has ever held, including entries
    // already drained by replay. The ordering check runs against this, not
    // against the (possibly empty) backlog.
    last_seq: Option<SequenceNo>,
}

impl OfflineScanQueue {
    /// Open (or create) the queue for `device_id` under `dir`, reloading
    /// any entries left from a previous run.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Io`] on filesystem failure
    /// - [`QueueError::Corrupt`] if the log fails to parse or its entries
    ///   are not strictly ordered for this device
    pub async fn open(dir: impl AsRef<Path>, device_id: DeviceId) -> Result<Self, QueueError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.jsonl", sanitize(device_id.as_str())));

        let mut entries = VecDeque::new();
        if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            let mut last_seq: Option<SequenceNo> = None;
            for (idx, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let scan: ScanEvent =
                    serde_json::from_str(line).map_err(|e| QueueError::Corrupt {
                        line: idx + 1,
                        reason: e.to_string(),
                    })?;
                if scan.device_id != device_id {
                    return Err(QueueError::Corrupt {
                        line: idx + 1,
                        reason: format!("entry belongs to device {}", scan.device_id),
                    });
                }
                if last_seq.is_some_and(|last| scan.sequence_no <= last) {
                    return Err(QueueError::Corrupt {
                        line: idx + 1,
                        reason: format!("sequence {} not increasing", scan.sequence_no),
                    });
                }
                last_seq = Some(scan.sequence_no);
                entries.push_back(scan);
            }
        }

        tracing::debug!(
            device = %device_id,
            pending = entries.len(),
            "Offline queue opened"
        );

        let last_seq = entries.back().map(|scan| scan.sequence_no);
        Ok(Self {
            device_id,
            path,
            entries,
            last_seq,
        })
    }

    /// The device this queue belongs to.
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Number of scans waiting for replay.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Whether no scans are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a scan captured while offline.
    ///
    /// The scan is durably appended to the log before the call returns.
    /// Sequence numbers must strictly increase over every scan this queue
    /// has seen, including entries already drained by a replay.
    ///
    /// # Errors
    ///
    /// - [`QueueError::WrongDevice`] if the scan names another device
    /// - [`QueueError::OutOfOrder`] if its sequence number does not
    ///   strictly increase
    /// - [`QueueError::Io`] on filesystem failure
    pub async fn enqueue(&mut self, scan: ScanEvent) -> Result<(), QueueError> {
        if scan.device_id != self.device_id {
            return Err(QueueError::WrongDevice {
                expected: self.device_id.clone(),
                got: scan.device_id,
            });
        }
        if let Some(last) = self.last_seq {
            if scan.sequence_no <= last {
                return Err(QueueError::OutOfOrder {
                    device: self.device_id.clone(),
                    last,
                    got: scan.sequence_no,
                });
            }
        }

        let mut line = serde_json::to_string(&scan).map_err(|e| QueueError::Corrupt {
            line: 0,
            reason: e.to_string(),
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.last_seq = Some(scan.sequence_no);
        self.entries.push_back(scan);
        Ok(())
    }

    /// Drain queued scans against the coordinator in capture order.
    ///
    /// Stops at the first transient failure, leaving that entry and all
    /// later ones queued (strict order is preserved across passes). The
    /// compacted log is rewritten before returning.
    ///
    /// # Errors
    ///
    /// [`QueueError::Io`] if compacting the log fails. Coordinator results,
    /// terminal or transient, are reported in the [`ReplayReport`], not as
    /// errors.
    pub async fn replay(
        &mut self,
        coordinator: &RedemptionCoordinator,
    ) -> Result<ReplayReport, QueueError> {
        let mut accepted = 0;
        let mut rejected = 0;
        let mut stopped_on = None;

        while let Some(scan) = self.entries.front() {
            match coordinator.redeem(scan).await {
                Ok(_) => {
                    accepted += 1;
                    self.entries.pop_front();
                }
                Err(e) if e.is_terminal() => {
                    tracing::info!(
                        device = %self.device_id,
                        ticket = %scan.ticket_code,
                        result = %e,
                        "Offline scan definitively rejected"
                    );
                    rejected += 1;
                    self.entries.pop_front();
                }
                Err(e) => {
                    tracing::warn!(
                        device = %self.device_id,
                        ticket = %scan.ticket_code,
                        error = %e,
                        "Replay stopped on transient failure"
                    );
                    stopped_on = Some(e);
                    break;
                }
            }
        }

        self.compact().await?;

        Ok(ReplayReport {
            accepted,
            rejected,
            remaining: self.entries.len(),
            stopped_on,
        })
    }

    /// Rewrite the log to contain exactly the still-pending entries.
    async fn compact(&self) -> Result<(), QueueError> {
        let mut contents = String::new();
        for scan in &self.entries {
            let line = serde_json::to_string(scan).map_err(|e| QueueError::Corrupt {
                line: 0,
                reason: e.to_string(),
            })?;
            contents.push_str(&line);
            contents.push('\n');
        }
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

/// Device IDs become file names; keep only filesystem-safe characters.
fn sanitize(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests fail loudly on unexpected results
mod tests {
    use super::*;
    use chrono::Utc;

    fn scan(device: &str, seq: u64, code: &str) -> ScanEvent {
        ScanEvent::new(code, device, seq, Utc::now())
    }

    #[tokio::test]
    async fn enqueue_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let device = DeviceId::new("dev-a");

        {
            let mut queue = OfflineScanQueue::open(dir.path(), device.clone())
                .await
                .unwrap();
            queue.enqueue(scan("dev-a", 1, "T-001")).await.unwrap();
            queue.enqueue(scan("dev-a", 2, "T-002")).await.unwrap();
            assert_eq!(queue.pending(), 2);
        }

        let queue = OfflineScanQueue::open(dir.path(), device).await.unwrap();
        assert_eq!(queue.pending(), 2);
    }

    #[tokio::test]
    async fn rejects_out_of_order_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a"))
            .await
            .unwrap();

        queue.enqueue(scan("dev-a", 5, "T-001")).await.unwrap();
        let result = queue.enqueue(scan("dev-a", 5, "T-002")).await;
        assert!(matches!(result, Err(QueueError::OutOfOrder { .. })));
        let result = queue.enqueue(scan("dev-a", 4, "T-003")).await;
        assert!(matches!(result, Err(QueueError::OutOfOrder { .. })));
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn rejects_foreign_device_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a"))
            .await
            .unwrap();

        let result = queue.enqueue(scan("dev-b", 1, "T-001")).await;
        assert!(matches!(result, Err(QueueError::WrongDevice { .. })));
    }

    #[tokio::test]
    async fn corrupt_log_is_reported_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-a.jsonl");
        tokio::fs::write(&path, "not json\n").await.unwrap();

        let result = OfflineScanQueue::open(dir.path(), DeviceId::new("dev-a")).await;
        assert!(matches!(
            result,
            Err(QueueError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize("gate-3_scanner"), "gate-3_scanner");
        assert_eq!(sanitize("dev/../etc"), "dev____etc");
    }
}
