//! `PostgreSQL` ticket store for the redemption engine.
//!
//! Production implementation of the `TicketStore` trait from
//! `redemption-core`. Compare-and-swap is a single conditional `UPDATE`
//! guarded by `code AND version`: the row either moves atomically to the
//! new state with `version + 1`, or zero rows are affected and a follow-up
//! read disambiguates "ticket gone" from "another writer won".
//!
//! # Example
//!
//! ```ignore
//! use redemption_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect(
//!         "postgres://localhost/redemption",
//!         10,
//!         std::time::Duration::from_secs(30),
//!     )
//!     .await?;
//!     store.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use redemption_core::store::{StoreError, StoreFuture, TicketChange, TicketStore};
use redemption_core::{
    DeviceId, DrawRecord, SequenceNo, Ticket, TicketCode, TicketState, Version,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Bundled schema, applied by [`PostgresTicketStore::ensure_schema`].
const SCHEMA: &str = include_str!("../schema.sql");

/// `PostgreSQL`-backed [`TicketStore`].
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

/// Raw ticket row as stored.
type TicketRow = (
    String,                // state
    Option<String>,        // redeemed_by
    Option<DateTime<Utc>>, // redeemed_at
    Option<String>,        // last_scan_device
    Option<i64>,           // last_scan_seq
    bool,                  // drawn
    i64,                   // version
);

impl PostgresTicketStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and build a pooled store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection cannot be
    /// established.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self::new(pool))
    }

    /// Access the underlying connection pool (health checks, manual
    /// queries).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tickets and draw-records tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if schema creation fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        tracing::debug!("Ticket store schema ensured");
        Ok(())
    }

    async fn get_inner(&self, code: &TicketCode) -> Result<Ticket, StoreError> {
        let row: Option<TicketRow> = sqlx::query_as(
            "SELECT state, redeemed_by, redeemed_at, last_scan_device, last_scan_seq,
                    drawn, version
             FROM tickets WHERE code = $1",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let row = row.ok_or_else(|| StoreError::NotFound(code.clone()))?;
        ticket_from_row(code.clone(), row)
    }

    async fn cas_inner(
        &self,
        code: &TicketCode,
        expected_version: Version,
        change: TicketChange,
    ) -> Result<Version, StoreError> {
        let expected = to_db_u64(expected_version.value());

        let result = match change {
            TicketChange::Redeem {
                device_id,
                sequence_no,
                at,
            } => {
                sqlx::query(
                    "UPDATE tickets
                     SET state = 'redeemed', redeemed_by = $3, redeemed_at = $4,
                         last_scan_device = $3, last_scan_seq = $5,
                         version = version + 1
                     WHERE code = $1 AND version = $2 AND state = 'issued'",
                )
                .bind(code.as_str())
                .bind(expected)
                .bind(device_id.as_str())
                .bind(at)
                .bind(to_db_u64(sequence_no.value()))
                .execute(&self.pool)
                .await
            }
            TicketChange::Void => {
                sqlx::query(
                    "UPDATE tickets SET state = 'void', version = version + 1
                     WHERE code = $1 AND version = $2",
                )
                .bind(code.as_str())
                .bind(expected)
                .execute(&self.pool)
                .await
            }
            TicketChange::SetDrawn(flag) => {
                sqlx::query(
                    "UPDATE tickets SET drawn = $3, version = version + 1
                     WHERE code = $1 AND version = $2",
                )
                .bind(code.as_str())
                .bind(expected)
                .bind(flag)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(expected_version.next());
        }

        // Zero rows: disambiguate with a follow-up read.
        let actual: Option<(i64,)> = sqlx::query_as("SELECT version FROM tickets WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match actual {
            None => Err(StoreError::NotFound(code.clone())),
            Some((version,)) => Err(StoreError::VersionConflict {
                code: code.clone(),
                expected: expected_version,
                actual: Version::new(from_db_u64(version)),
            }),
        }
    }

    async fn insert_inner(&self, ticket: Ticket) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO tickets
                 (code, state, redeemed_by, redeemed_at, last_scan_device,
                  last_scan_seq, drawn, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(ticket.code.as_str())
        .bind(ticket.state.to_string())
        .bind(ticket.redeemed_by.as_ref().map(DeviceId::as_str))
        .bind(ticket.redeemed_at)
        .bind(ticket.last_scan.as_ref().map(|(d, _)| d.as_str()))
        .bind(ticket.last_scan.as_ref().map(|(_, s)| to_db_u64(s.value())))
        .bind(ticket.drawn)
        .bind(to_db_u64(ticket.version.value()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(ticket.code));
        }
        Ok(())
    }

    async fn eligible_pool_inner(&self) -> Result<Vec<TicketCode>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT code FROM tickets
             WHERE state = 'redeemed' AND NOT drawn
             ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(|(code,)| TicketCode::new(code)).collect())
    }

    async fn record_draw_inner(&self, record: &DrawRecord) -> Result<(), StoreError> {
        let pool_json = serde_json::to_value(&record.eligible_pool).map_err(backend)?;
        let winners_json = serde_json::to_value(&record.winners).map_err(backend)?;

        sqlx::query(
            "INSERT INTO draw_records (draw_id, seed, eligible_pool, winners, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.draw_id)
        .bind(to_db_u64(record.seed))
        .bind(pool_json)
        .bind(winners_json)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_draw_inner(&self, draw_id: Uuid) -> Result<DrawRecord, StoreError> {
        let row: Option<(i64, serde_json::Value, serde_json::Value, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT seed, eligible_pool, winners, created_at
                 FROM draw_records WHERE draw_id = $1",
            )
            .bind(draw_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let (seed, pool_json, winners_json, created_at) =
            row.ok_or(StoreError::DrawNotFound(draw_id))?;

        Ok(DrawRecord {
            draw_id,
            seed: from_db_u64(seed),
            eligible_pool: serde_json::from_value(pool_json).map_err(backend)?,
            winners: serde_json::from_value(winners_json).map_err(backend)?,
            created_at,
        })
    }
}

impl TicketStore for PostgresTicketStore {
    fn get(&self, code: &TicketCode) -> StoreFuture<'_, Ticket> {
        let code = code.clone();
        Box::pin(async move { self.get_inner(&code).await })
    }

    fn compare_and_swap(
        &self,
        code: &TicketCode,
        expected_version: Version,
        change: TicketChange,
    ) -> StoreFuture<'_, Version> {
        let code = code.clone();
        Box::pin(async move { self.cas_inner(&code, expected_version, change).await })
    }

    fn insert(&self, ticket: Ticket) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.insert_inner(ticket).await })
    }

    fn eligible_pool(&self) -> StoreFuture<'_, Vec<TicketCode>> {
        Box::pin(async move { self.eligible_pool_inner().await })
    }

    fn record_draw(&self, record: &DrawRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move { self.record_draw_inner(&record).await })
    }

    fn load_draw(&self, draw_id: Uuid) -> StoreFuture<'_, DrawRecord> {
        Box::pin(async move { self.load_draw_inner(draw_id).await })
    }
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// `u64` counters are stored bit-for-bit in `BIGINT` columns.
#[allow(clippy::cast_possible_wrap)]
const fn to_db_u64(value: u64) -> i64 {
    value as i64
}

#[allow(clippy::cast_sign_loss)]
const fn from_db_u64(value: i64) -> u64 {
    value as u64
}

fn ticket_from_row(code: TicketCode, row: TicketRow) -> Result<Ticket, StoreError> {
    let (state, redeemed_by, redeemed_at, last_scan_device, last_scan_seq, drawn, version) = row;

    let state = match state.as_str() {
        "issued" => TicketState::Issued,
        "redeemed" => TicketState::Redeemed,
        "void" => TicketState::Void,
        other => {
            return Err(StoreError::Backend(format!(
                "unexpected ticket state '{other}' for {code}"
            )));
        }
    };

    let last_scan = match (last_scan_device, last_scan_seq) {
        (Some(device), Some(seq)) => {
            Some((DeviceId::new(device), SequenceNo::new(from_db_u64(seq))))
        }
        _ => None,
    };

    Ok(Ticket {
        code,
        state,
        redeemed_by: redeemed_by.map(DeviceId::new),
        redeemed_at,
        last_scan,
        drawn,
        version: Version::new(from_db_u64(version)),
    })
}
