//! Scan events - the scanner input boundary.
//!
//! A [`ScanEvent`] is what the barcode-decoding layer hands to the core:
//! an opaque ticket code plus the identity and monotonic counter of the
//! device that captured it. Scan events are ephemeral; they live only in
//! the offline queue and the audit trail, never in the ticket store.

use crate::ticket::{DeviceId, SequenceNo, TicketCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single decoded scan from a handheld device.
///
/// `captured_at` is the *client* clock at capture time - informational
/// only, never used for ordering. Ordering within a device comes from
/// `sequence_no`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Decoded ticket code (opaque to the core).
    pub ticket_code: TicketCode,
    /// Device that captured the scan.
    pub device_id: DeviceId,
    /// Per-device monotonic counter, assigned at capture.
    pub sequence_no: SequenceNo,
    /// Client-clock capture timestamp.
    pub captured_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Create a new scan event.
    #[must_use]
    pub fn new(
        ticket_code: impl Into<TicketCode>,
        device_id: impl Into<DeviceId>,
        sequence_no: impl Into<SequenceNo>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_code: ticket_code.into(),
            device_id: device_id.into(),
            sequence_no: sequence_no.into(),
            captured_at,
        }
    }
}
