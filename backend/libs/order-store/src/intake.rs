//! The transactional intake contract.
//!
//! The HTTP façade is out of scope, but the handoff it relies on is not:
//! the order row and the `ORDER_CREATED` outbox row must land in one
//! transaction. A crash between a commit and a broker publish can then
//! never lose the event; the relay picks the row up whenever it next runs.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use event_schema::{AGGREGATE_ORDER, ORDER_CREATED};
use transactional_outbox::OutboxRepository;

use crate::events::{audit, audit_event, EventLog};
use crate::store::{NewOrder, SqlxOrderStore};

/// Create the order and enqueue its `ORDER_CREATED` event atomically.
/// Returns the outbox row id, which becomes the event's idempotency key.
///
/// Audit entries are written after the commit; they are advisory and must
/// not be able to roll back the intake.
pub async fn submit_order(
    pool: &PgPool,
    store: &SqlxOrderStore,
    outbox: &dyn OutboxRepository,
    events: &dyn EventLog,
    order: NewOrder,
) -> Result<i64> {
    let created_at_ms = Utc::now().timestamp_millis();

    let mut tx = pool.begin().await.context("failed to begin intake transaction")?;

    store
        .create_in_tx(&mut tx, &order, created_at_ms)
        .await
        .context("failed to create order row")?;

    let outbox_id = outbox
        .enqueue(
            &mut tx,
            AGGREGATE_ORDER,
            &order.id,
            ORDER_CREATED,
            &json!({ "order_id": order.id }),
        )
        .await
        .context("failed to enqueue outbox event")?;

    tx.commit().await.context("failed to commit intake transaction")?;

    info!(order_id = %order.id, outbox_id, "Order accepted");

    audit(
        events,
        &order.id,
        audit_event::CREATED,
        json!({ "client_id": order.client_id }),
    )
    .await;
    audit(
        events,
        &order.id,
        audit_event::OUTBOX_ENQUEUED,
        json!({ "event_type": ORDER_CREATED, "outbox_id": outbox_id }),
    )
    .await;

    Ok(outbox_id)
}
