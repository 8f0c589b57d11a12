//! # Redemption Engine
//!
//! The redemption concurrency engine and draw-selection algorithm for
//! live-event ticketing: many handheld scanners, intermittently offline,
//! redeeming barcoded tickets exactly once against a single shared store -
//! plus a reproducible, auditable lottery draw over the checked-in pool.
//!
//! ## Components
//!
//! - [`coordinator::RedemptionCoordinator`]: atomically transitions tickets
//!   `Issued → Redeemed` via compare-and-swap with bounded retry; rejects
//!   duplicates deterministically; replays of an already-applied scan
//!   return the original success
//! - [`queue::OfflineScanQueue`]: per-device durable log of offline scans,
//!   replayed strictly in capture order on reconnect
//! - [`draw::DrawEngine`]: seeded Fisher-Yates selection without
//!   replacement, recorded as an immutable, verifiable artifact
//! - [`sync::BroadcastChangeFeed`]: best-effort change fan-out to
//!   connected devices
//!
//! ## Data flow
//!
//! ```text
//! scanner → decoded code → RedemptionCoordinator → TicketStore (CAS)
//!                                   │                    │
//!                                   │                    └→ change feed → UIs
//!                 offline: scanner → OfflineScanQueue ─┘ (replay on reconnect)
//!
//! DrawEngine ── snapshot ──→ TicketStore ←── DrawRecord
//! ```

pub mod config;
pub mod coordinator;
pub mod draw;
pub mod queue;
pub mod retry;
pub mod sync;

pub use config::Config;
pub use coordinator::{RedeemError, RedeemOutcome, RedemptionCoordinator};
pub use draw::{DrawEngine, DrawError, DrawOutcome};
pub use queue::{OfflineScanQueue, QueueError, ReplayReport};
pub use retry::RetryPolicy;
pub use sync::BroadcastChangeFeed;
