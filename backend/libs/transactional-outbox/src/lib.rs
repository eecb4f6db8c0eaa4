//! # Transactional Outbox
//!
//! Reliable event publishing for the order pipeline. Business writes and
//! the intent to publish are recorded in one database transaction; a
//! background relay drains the `outbox` table into the broker and deletes
//! each row only after the broker confirms persistence.
//!
//! This guarantees **at-least-once delivery** even if:
//! - the service crashes after the database commit but before publish
//! - the broker is temporarily unavailable
//! - a relay crashes mid-batch (rows it claimed unlock on rollback)
//!
//! Unlike a `published_at` flag, row presence itself means "pending":
//! there is nothing to mark, and nothing to sweep up later.
//!
//! Multiple relays may run in parallel; `FOR UPDATE SKIP LOCKED` claims
//! partition the table per row. Within one relay, rows are published in
//! ascending id, which is what gives each aggregate its FIFO.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use event_schema::EventEnvelope;

mod error;
pub mod metrics;
mod relay;

pub use error::{OutboxError, OutboxResult};
pub use relay::{NoopListener, OutboxRelay, PublishListener};

/// A pending event in the outbox table.
///
/// The row id doubles as the event's idempotency key on the wire: it is
/// monotonically assigned, so consumers can use it to suppress replays
/// and to order events within an aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Monotonic row id; becomes `event_id` and `correlation_id`
    pub id: i64,

    /// Type of aggregate this event relates to (e.g., "order")
    pub aggregate_type: String,

    /// ID of the entity this event relates to
    pub aggregate_id: String,

    /// Domain event type (e.g., "ORDER_CREATED")
    pub event_type: String,

    /// Event payload as JSON
    pub payload: serde_json::Value,

    /// Timestamp when the event was enqueued
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// The wire envelope published for this row.
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope::new(
            &self.aggregate_id,
            self.id,
            &self.aggregate_type,
            self.payload.clone(),
        )
    }
}

/// Repository trait for managing outbox rows.
///
/// All mutating methods take the caller's transaction: `enqueue` so the
/// event commits or rolls back with the business change that produced it,
/// `claim_batch`/`delete` so a relay crash before commit releases its
/// claimed rows untouched.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new pending event. Returns the assigned row id.
    async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> OutboxResult<i64>;

    /// Lock and return up to `limit` pending rows in ascending id order.
    /// Uses skip-locked semantics so concurrent relays never block on or
    /// double-claim each other's rows.
    async fn claim_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>>;

    /// Remove a row after the broker confirmed the publish.
    async fn delete(&self, tx: &mut Transaction<'_, Postgres>, id: i64) -> OutboxResult<()>;

    /// Pending count and oldest pending age in seconds (0 when empty).
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// SQLx-based implementation of [`OutboxRepository`] using PostgreSQL.
#[derive(Clone)]
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn enqueue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> OutboxResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (aggregate_type, aggregate_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&mut **tx)
        .await?;

        debug!(
            outbox_id = id,
            aggregate_id = %aggregate_id,
            event_type = %event_type,
            "Event enqueued to outbox"
        );

        Ok(id)
    }

    async fn claim_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, created_at
            FROM outbox
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxEvent {
                    id: row.try_get("id")?,
                    aggregate_type: row.try_get("aggregate_type")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(count = events.len(), "Claimed outbox batch");

        Ok(events)
    }

    async fn delete(&self, tx: &mut Transaction<'_, Postgres>, id: i64) -> OutboxResult<()> {
        let result = sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(id));
        }

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending: i64 = row.try_get("pending").unwrap_or(0);
        let age: i64 = row.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}
