//! Append-only audit trail.
//!
//! Every state transition and external-call outcome is recorded here.
//! The log is advisory: a failed append must never abort the pipeline, so
//! callers go through [`audit`] which logs and swallows errors.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use crate::error::StoreResult;

/// Audit event types written by the pipeline.
pub mod audit_event {
    pub const CREATED: &str = "CREATED";
    pub const OUTBOX_ENQUEUED: &str = "OUTBOX_ENQUEUED";
    pub const QUEUED: &str = "QUEUED";
    pub const PROCESSING: &str = "PROCESSING";
    pub const CMS_CALLING: &str = "CMS_CALLING";
    pub const CMS_OK: &str = "CMS_OK";
    pub const CMS_ERROR: &str = "CMS_ERROR";
    pub const ROS_CALLING: &str = "ROS_CALLING";
    pub const ROUTE_SAVED: &str = "ROUTE_SAVED";
    pub const ROS_OK: &str = "ROS_OK";
    pub const ROS_ERROR: &str = "ROS_ERROR";
    pub const WMS_CALLING: &str = "WMS_CALLING";
    pub const WMS_OK: &str = "WMS_OK";
    pub const WMS_ERROR: &str = "WMS_ERROR";
    pub const READY_FOR_DRIVER: &str = "READY_FOR_DRIVER";
    pub const FAILED: &str = "FAILED";
    pub const RETRY_SCHEDULED: &str = "RETRY_SCHEDULED";
    pub const DLQ: &str = "DLQ";
    pub const DUPLICATE_SKIP: &str = "DUPLICATE_SKIP";
    pub const SKIP_ALREADY_DONE: &str = "SKIP_ALREADY_DONE";
    pub const DRIVER_ASSIGNED: &str = "DRIVER_ASSIGNED";
    pub const DRIVER_ASSIGN_FAILED: &str = "DRIVER_ASSIGN_FAILED";
}

/// Append-only sink for order audit events.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(
        &self,
        order_id: &str,
        event_type: &str,
        details: serde_json::Value,
    ) -> StoreResult<()>;
}

/// SQLx-backed implementation over `order_events`.
#[derive(Clone)]
pub struct SqlxEventLog {
    pool: PgPool,
}

impl SqlxEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for SqlxEventLog {
    async fn append(
        &self,
        order_id: &str,
        event_type: &str,
        details: serde_json::Value,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO order_events (order_id, event_type, details) VALUES ($1, $2, $3)",
        )
        .bind(order_id)
        .bind(event_type)
        .bind(details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Best-effort append: audit failures are logged, never propagated.
pub async fn audit(
    log: &dyn EventLog,
    order_id: &str,
    event_type: &str,
    details: serde_json::Value,
) {
    if let Err(e) = log.append(order_id, event_type, details).await {
        warn!(
            order_id = %order_id,
            event_type = %event_type,
            error = %e,
            "Audit append failed"
        );
    }
}
