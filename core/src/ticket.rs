//! Ticket identity, state, and versioning types.
//!
//! This module defines strong types for ticket identification
//! ([`TicketCode`]), scanner identity ([`DeviceId`]), per-device scan
//! counters ([`SequenceNo`]), and the optimistic-concurrency token
//! ([`Version`]), plus the [`Ticket`] record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for [`TicketCode`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid ticket code: {0}")]
pub struct ParseTicketCodeError(String);

/// Opaque ticket identity decoded from a barcode or QR code.
///
/// The core performs no format validation beyond non-empty: whatever the
/// decoding layer hands over is the ticket's immutable identity.
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for internal use with
///   trusted input)
///
/// Use `FromStr` when parsing scanner input. Use `new()` or `From` when
/// constructing codes from application-controlled data.
///
/// # Examples
///
/// ```
/// use redemption_core::ticket::TicketCode;
///
/// let code = TicketCode::new("T-001");
/// assert_eq!(code.as_str(), "T-001");
///
/// let parsed: TicketCode = "T-002".parse().unwrap();
/// assert_eq!(parsed, TicketCode::new("T-002"));
/// assert!("".parse::<TicketCode>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketCode(String);

impl TicketCode {
    /// Create a new `TicketCode` from a string.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the code is empty (never valid as scanner input).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketCode {
    type Err = ParseTicketCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseTicketCodeError(
                "Ticket code cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for TicketCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TicketCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TicketCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a scanning device (and, by extension, the staff operating it).
///
/// # Examples
///
/// ```
/// use redemption_core::ticket::DeviceId;
///
/// let device = DeviceId::new("gate-3-scanner");
/// assert_eq!(device.as_str(), "gate-3-scanner");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the device ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-device monotonic scan counter.
///
/// Every scan a device captures carries the next sequence number, which
/// gives the offline queue its strict replay order and lets the coordinator
/// recognize an exact retransmission of a scan that already succeeded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNo(u64);

impl SequenceNo {
    /// Create a new `SequenceNo` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next sequence number (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Ticket version number for optimistic concurrency control.
///
/// Versions start at 0 and increment by exactly 1 for each state change.
/// The version is the compare-and-swap token that prevents lost updates
/// when many scanners race on the same ticket:
///
/// - When mutating a ticket, the caller names the version it observed
/// - If the stored version no longer matches, the write fails with a
///   version conflict and the caller re-reads and retries
///
/// # Examples
///
/// ```
/// use redemption_core::ticket::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The initial version (0) for a freshly issued ticket.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// # Overflow Behavior
    ///
    /// Reaching `u64::MAX` state changes on one ticket is not a realistic
    /// concern.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Lifecycle state of a ticket.
///
/// The only transitions are `Issued → Redeemed` (exactly once, via the
/// coordinator) and the administrative `Issued | Redeemed → Void`.
/// `Redeemed` is otherwise terminal; `Void` is always terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketState {
    /// Issued and not yet checked in.
    Issued,
    /// Checked in; terminal except for administrative void.
    Redeemed,
    /// Administratively cancelled; terminal.
    Void,
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issued => write!(f, "issued"),
            Self::Redeemed => write!(f, "redeemed"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// A versioned ticket record - the unit of state owned by the ticket store.
///
/// `redeemed_by`, `redeemed_at`, and `last_scan` are set only on the
/// transition to [`TicketState::Redeemed`]. `last_scan` records the exact
/// `(device, sequence)` pair whose scan performed the redemption, which is
/// what lets the coordinator answer an identical retransmission with the
/// original success instead of `AlreadyRedeemed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Immutable identity decoded from the barcode.
    pub code: TicketCode,
    /// Current lifecycle state.
    pub state: TicketState,
    /// Device that redeemed the ticket, if redeemed.
    pub redeemed_by: Option<DeviceId>,
    /// When the ticket was redeemed, if redeemed.
    pub redeemed_at: Option<DateTime<Utc>>,
    /// The scan that performed the redemption, if redeemed.
    pub last_scan: Option<(DeviceId, SequenceNo)>,
    /// Whether the ticket has been selected by a draw.
    pub drawn: bool,
    /// Optimistic-concurrency token, incremented on every state change.
    pub version: Version,
}

impl Ticket {
    /// Create a freshly issued ticket at [`Version::INITIAL`].
    #[must_use]
    pub const fn issued(code: TicketCode) -> Self {
        Self {
            code,
            state: TicketState::Issued,
            redeemed_by: None,
            redeemed_at: None,
            last_scan: None,
            drawn: false,
            version: Version::INITIAL,
        }
    }

    /// Whether the ticket is currently redeemed.
    #[must_use]
    pub fn is_redeemed(&self) -> bool {
        self.state == TicketState::Redeemed
    }

    /// Whether this ticket's redemption was performed by exactly this
    /// `(device, sequence)` scan.
    #[must_use]
    pub fn redeemed_by_scan(&self, device_id: &DeviceId, sequence_no: SequenceNo) -> bool {
        self.last_scan
            .as_ref()
            .is_some_and(|(d, s)| d == device_id && *s == sequence_no)
    }

    /// Whether the ticket is eligible for a draw: redeemed and not yet
    /// selected by a previous draw.
    #[must_use]
    pub fn is_draw_eligible(&self) -> bool {
        self.is_redeemed() && !self.drawn
    }
}
