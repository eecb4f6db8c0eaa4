//! Post-publish side effects.
//!
//! Once the broker confirms an `ORDER_CREATED` event, the order becomes
//! visibly `QUEUED`: status flip, audit entry, live push. All of it is
//! best-effort; a failure here never blocks the relay, and a republished
//! row never regresses an order the worker already picked up.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use gateway_client::Gateway;
use order_store::{audit, audit_event, EventLog, OrderStatus, OrderStore};
use transactional_outbox::{OutboxEvent, PublishListener};

pub struct QueuedTransitionListener {
    store: Arc<dyn OrderStore>,
    events: Arc<dyn EventLog>,
    gateway: Arc<dyn Gateway>,
}

impl QueuedTransitionListener {
    pub fn new(
        store: Arc<dyn OrderStore>,
        events: Arc<dyn EventLog>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            store,
            events,
            gateway,
        }
    }
}

#[async_trait]
impl PublishListener for QueuedTransitionListener {
    async fn published(&self, event: &OutboxEvent) {
        let order_id = &event.aggregate_id;

        match self.store.mark_queued(order_id).await {
            Ok(true) => {
                audit(
                    self.events.as_ref(),
                    order_id,
                    audit_event::QUEUED,
                    json!({ "event_id": event.id.to_string() }),
                )
                .await;
                self.gateway
                    .push_status(order_id, OrderStatus::Queued.as_str())
                    .await;
            }
            Ok(false) => {
                debug!(
                    order_id = %order_id,
                    outbox_id = event.id,
                    "Order already past NEW, leaving status untouched"
                );
            }
            Err(e) => {
                warn!(
                    order_id = %order_id,
                    outbox_id = event.id,
                    error = %e,
                    "Failed to mark order queued"
                );
            }
        }
    }
}
