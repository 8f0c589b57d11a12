//! Draw records - immutable, reproducible lottery-draw artifacts.
//!
//! A [`DrawRecord`] captures everything needed to re-run a draw and obtain
//! the identical winner list: the seed, the ordered eligible pool at
//! snapshot time, and the winners in selection order. Once written it is
//! never modified; disputes are settled by recomputing the shuffle from
//! the recorded inputs.

use crate::ticket::TicketCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable record of one completed draw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    /// Unique identifier for this draw.
    pub draw_id: Uuid,
    /// Seed that drove the deterministic shuffle.
    pub seed: u64,
    /// Ordered snapshot of the ticket codes considered.
    pub eligible_pool: Vec<TicketCode>,
    /// Winners in selection order (ties broken by seed-derived order).
    pub winners: Vec<TicketCode>,
    /// When the draw was performed.
    pub created_at: DateTime<Utc>,
}

impl DrawRecord {
    /// Number of winners selected.
    #[must_use]
    pub fn winner_count(&self) -> usize {
        self.winners.len()
    }

    /// Whether the given code was selected by this draw.
    #[must_use]
    pub fn is_winner(&self, code: &TicketCode) -> bool {
        self.winners.contains(code)
    }
}
