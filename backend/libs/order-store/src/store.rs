//! Persistent order records.
//!
//! The order row is the single point of write coordination for an order:
//! every mutation is one atomic single-row statement, so concurrent
//! workers and relays never need cross-row locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::status::OrderStatus;

/// Bound applied to `last_error` before it is written.
const MAX_ERROR_LEN: usize = 500;

/// A stored order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    pub payload: serde_json::Value,
    pub status: OrderStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Most recently applied broker event (outbox id); the idempotency
    /// horizon for replays.
    pub last_event_id: Option<i64>,
    pub assigned_driver_id: Option<String>,
    /// Logical creation time, epoch milliseconds.
    pub created_at: i64,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by intake when an order is first created.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: String,
    pub client_id: String,
    pub payload: serde_json::Value,
}

/// Read/write access to order rows.
///
/// The worker and terminator talk to this trait so tests can run the
/// whole pipeline against an in-memory implementation.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch the full record.
    async fn get(&self, id: &str) -> StoreResult<Order>;

    /// Fetch just the status.
    async fn get_status(&self, id: &str) -> StoreResult<OrderStatus>;

    /// Atomic single-row status update. `last_error` is retained from the
    /// previous value when `None`; `inc_retry` bumps `retry_count` in the
    /// same statement.
    async fn update_status(
        &self,
        id: &str,
        status: OrderStatus,
        last_error: Option<&str>,
        inc_retry: bool,
    ) -> StoreResult<()>;

    /// Conditional `NEW → QUEUED` used by the outbox relay. Returns false
    /// when the order already moved past `NEW` (a republished outbox row
    /// must not regress it).
    async fn mark_queued(&self, id: &str) -> StoreResult<bool>;

    /// Merge a route object under `payload.route`.
    async fn set_route(&self, id: &str, route: &serde_json::Value) -> StoreResult<()>;

    /// Compare-and-set on `assigned_driver_id`: only writes when the
    /// column is NULL. Returns the now-effective driver id.
    async fn assign_driver_if_absent(&self, id: &str, driver_id: &str) -> StoreResult<String>;

    /// First available driver candidate, deterministic tie-break by email.
    async fn pick_driver(&self) -> StoreResult<Option<String>>;

    /// Record that `event_id` has been applied. Monotonic: older ids never
    /// overwrite newer ones.
    async fn mark_event_processed(&self, id: &str, event_id: i64) -> StoreResult<()>;

    /// Whether `event_id` (or anything newer) has already been applied.
    async fn is_event_processed(&self, id: &str, event_id: i64) -> StoreResult<bool>;
}

/// SQLx-backed implementation over the `orders` and `users` tables.
#[derive(Clone)]
pub struct SqlxOrderStore {
    pool: PgPool,
}

impl SqlxOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a fresh order in status `NEW` inside the caller's
    /// transaction. Intake pairs this with the outbox insert.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order: &NewOrder,
        created_at_ms: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, client_id, payload, status, retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, NOW())
            "#,
        )
        .bind(&order.id)
        .bind(&order.client_id)
        .bind(&order.payload)
        .bind(OrderStatus::New.as_str())
        .bind(created_at_ms)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::from_insert(e, &order.id))?;

        debug!(order_id = %order.id, client_id = %order.client_id, "Order row created");

        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqlxOrderStore {
    async fn get(&self, id: &str) -> StoreResult<Order> {
        let row = sqlx::query(
            r#"
            SELECT id, client_id, payload, status, retry_count, last_error,
                   last_event_id, assigned_driver_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let status: String = row.try_get("status")?;
        Ok(Order {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            last_event_id: row.try_get("last_event_id")?,
            assigned_driver_id: row.try_get("assigned_driver_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn get_status(&self, id: &str) -> StoreResult<OrderStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        status
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .parse()
    }

    async fn update_status(
        &self,
        id: &str,
        status: OrderStatus,
        last_error: Option<&str>,
        inc_retry: bool,
    ) -> StoreResult<()> {
        let bounded_error = last_error.map(truncate_error);

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                last_error = COALESCE($3, last_error),
                retry_count = retry_count + CASE WHEN $4 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(bounded_error)
        .bind(inc_retry)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        debug!(order_id = %id, status = %status, inc_retry, "Order status updated");

        Ok(())
    }

    async fn mark_queued(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(OrderStatus::Queued.as_str())
        .bind(OrderStatus::New.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_route(&self, id: &str, route: &serde_json::Value) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payload = jsonb_set(payload, '{route}', $2::jsonb, true),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(route)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn assign_driver_if_absent(&self, id: &str, driver_id: &str) -> StoreResult<String> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET assigned_driver_id = $2, updated_at = NOW()
            WHERE id = $1 AND assigned_driver_id IS NULL
            "#,
        )
        .bind(id)
        .bind(driver_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(driver_id.to_string());
        }

        // CAS lost or already assigned: report whoever holds the order.
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT assigned_driver_id FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(Some(assigned)) => Ok(assigned),
            // Row exists with NULL only if it vanished between the two
            // statements' views; treat our candidate as effective.
            Some(None) => Ok(driver_id.to_string()),
        }
    }

    async fn pick_driver(&self) -> StoreResult<Option<String>> {
        let driver: Option<String> = sqlx::query_scalar(
            "SELECT id FROM users WHERE role = 'driver' ORDER BY email LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(driver)
    }

    async fn mark_event_processed(&self, id: &str, event_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET last_event_id = GREATEST(COALESCE(last_event_id, 0), $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn is_event_processed(&self, id: &str, event_id: i64) -> StoreResult<bool> {
        let processed: Option<bool> = sqlx::query_scalar(
            "SELECT COALESCE(last_event_id, 0) >= $2 FROM orders WHERE id = $1",
        )
        .bind(id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(processed.unwrap_or(false))
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_ERROR_LEN).collect()
    }
}
