//! The pipeline worker core.
//!
//! Drives one broker delivery through the idempotency and skip gates, the
//! CMS→ROS→WMS stage sequence, and the retry/DLQ machinery. The broker
//! plumbing lives in [`crate::consumer`]; everything here talks to
//! injected capabilities so the whole state machine runs in tests without
//! a broker, a database, or live backends.
//!
//! Delivery protocol: the pipeline owns the ack through the
//! [`DeliveryAcker`] seam. A successful attempt acks after
//! `mark_event_processed`; a failed attempt acks FIRST and only then
//! republishes the retry/DLQ hop — broker redelivery of an unacked
//! failure would carry the same `x-retries` header on every round, an
//! uncontrolled redelivery loop that never escalates the backoff. An
//! `Err` from `process_delivery` aborts the session; whatever was not
//! acked by that point is redelivered after the rebuild.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use event_schema::EventEnvelope;
use gateway_client::Gateway;
use order_store::{audit, audit_event, EventLog, OrderStatus, OrderStore, StoreError};

use crate::adapters::BackendAdapter;
use crate::classify::classify_failure;
use crate::retry::RetryPolicy;
use crate::terminator::Terminator;

/// Where a delivery ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Pipeline ran to `READY_FOR_DRIVER`
    Completed,
    /// Idempotency gate: this event was already applied
    Duplicate,
    /// Skip gate: the order is already in a done state
    AlreadyDone,
    /// Attempt failed; a retry hop was scheduled
    Retried { retry: u32, ttl_ms: u64 },
    /// Parked on the DLQ (budget exhausted, malformed, or unknown order)
    DeadLettered { reason: String },
}

/// Ack seam for the in-flight delivery. The AMQP implementation wraps
/// the lapin delivery; tests count acks to verify ordering against the
/// republish hops.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// Republish seam for the retry/DLQ hops. The AMQP implementation lives
/// in the consumer; tests capture published hops in memory.
#[async_trait]
pub trait RetryRouter: Send + Sync {
    async fn publish_retry(
        &self,
        body: &[u8],
        correlation_id: &str,
        retries: u32,
        ttl_ms: u64,
    ) -> Result<()>;

    async fn publish_dlq(
        &self,
        body: &[u8],
        correlation_id: &str,
        retries: u32,
        reason: &str,
    ) -> Result<()>;
}

/// One worker's processing core. Holds no broker state.
pub struct PipelineWorker {
    store: Arc<dyn OrderStore>,
    events: Arc<dyn EventLog>,
    gateway: Arc<dyn Gateway>,
    router: Arc<dyn RetryRouter>,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    terminator: Terminator,
    retry_policy: RetryPolicy,
    demo_delays: bool,
}

impl PipelineWorker {
    pub fn new(
        store: Arc<dyn OrderStore>,
        events: Arc<dyn EventLog>,
        gateway: Arc<dyn Gateway>,
        router: Arc<dyn RetryRouter>,
        adapters: Vec<Arc<dyn BackendAdapter>>,
        retry_policy: RetryPolicy,
        demo_delays: bool,
    ) -> Self {
        let terminator = Terminator::new(store.clone(), events.clone(), gateway.clone());
        Self {
            store,
            events,
            gateway,
            router,
            adapters,
            terminator,
            retry_policy,
            demo_delays,
        }
    }

    /// Process one delivery. `retries` comes from the `x-retries` header.
    pub async fn process_delivery(
        &self,
        body: &[u8],
        retries: u32,
        acker: &dyn DeliveryAcker,
    ) -> Result<MessageOutcome> {
        // Malformed bodies can never be attributed to an order; park them
        // immediately with no order mutation.
        let envelope = match EventEnvelope::from_bytes(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed message body");
                acker.ack().await?;
                self.router
                    .publish_dlq(body, "", retries, "malformed")
                    .await?;
                return Ok(MessageOutcome::DeadLettered {
                    reason: "malformed".to_string(),
                });
            }
        };

        let event_id = match envelope.event_id_num() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, order_id = %envelope.order_id, "Malformed event id");
                acker.ack().await?;
                self.router
                    .publish_dlq(body, &envelope.event_id, retries, "malformed")
                    .await?;
                return Ok(MessageOutcome::DeadLettered {
                    reason: "malformed".to_string(),
                });
            }
        };

        let order_id = envelope.order_id.clone();

        // Idempotency gate: a replayed event_id must have no side effects.
        if self.store.is_event_processed(&order_id, event_id).await? {
            info!(order_id = %order_id, event_id, "Duplicate delivery skipped");
            audit(
                self.events.as_ref(),
                &order_id,
                audit_event::DUPLICATE_SKIP,
                json!({ "event_id": envelope.event_id }),
            )
            .await;
            acker.ack().await?;
            return Ok(MessageOutcome::Duplicate);
        }

        // Skip gate: never touch an order that already reached a terminal
        // state through another path.
        let status = match self.store.get_status(&order_id).await {
            Ok(status) => status,
            Err(StoreError::NotFound(_)) => {
                warn!(order_id = %order_id, "Event references unknown order");
                acker.ack().await?;
                self.router
                    .publish_dlq(body, &envelope.event_id, retries, "order not found")
                    .await?;
                return Ok(MessageOutcome::DeadLettered {
                    reason: "order not found".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if status.is_done() {
            info!(order_id = %order_id, status = %status, "Order already done, skipping");
            audit(
                self.events.as_ref(),
                &order_id,
                audit_event::SKIP_ALREADY_DONE,
                json!({ "status": status.as_str() }),
            )
            .await;
            acker.ack().await?;
            return Ok(MessageOutcome::AlreadyDone);
        }

        info!(order_id = %order_id, event_id, retries, "Processing order");

        match self.run_stages(&order_id).await {
            Ok(()) => {
                self.store.mark_event_processed(&order_id, event_id).await?;
                acker.ack().await?;
                info!(order_id = %order_id, event_id, "Order pipeline completed");
                Ok(MessageOutcome::Completed)
            }
            Err(e) => {
                self.handle_failure(&order_id, &envelope, body, retries, e, acker)
                    .await
            }
        }
    }

    /// Run the full stage sequence and the terminator. Re-entrant: on a
    /// retry every stage runs again, which is why adapters must be
    /// idempotent.
    async fn run_stages(&self, order_id: &str) -> Result<()> {
        self.transition(order_id, OrderStatus::Processing, json!({}))
            .await?;
        self.demo_pause(Duration::from_secs(1)).await;

        for adapter in &self.adapters {
            let stage = adapter.stage();

            self.transition(order_id, stage.calling_status(), json!({}))
                .await?;
            self.demo_pause(Duration::from_secs(1)).await;

            let result = adapter.execute(order_id).await?;

            if let Some(route) = result {
                self.store.set_route(order_id, &route).await?;
                audit(
                    self.events.as_ref(),
                    order_id,
                    audit_event::ROUTE_SAVED,
                    json!({ "route": route }),
                )
                .await;
            }

            self.transition(order_id, stage.ok_status(), json!({}))
                .await?;
            self.demo_pause(Duration::from_millis(500)).await;
        }

        self.terminator.finalize(order_id).await
    }

    /// Classify, record, ack, and reroute a failed attempt. Redelivery
    /// happens through the retry queue, never through broker requeue.
    async fn handle_failure(
        &self,
        order_id: &str,
        envelope: &EventEnvelope,
        body: &[u8],
        retries: u32,
        error: anyhow::Error,
        acker: &dyn DeliveryAcker,
    ) -> Result<MessageOutcome> {
        let error_text = format!("{error:#}");
        let failure_status = classify_failure(&error_text);

        warn!(
            order_id = %order_id,
            retries,
            status = %failure_status,
            error = %error_text,
            "Stage failed"
        );

        self.store
            .update_status(order_id, failure_status, Some(&error_text), true)
            .await?;
        audit(
            self.events.as_ref(),
            order_id,
            failure_status.as_str(),
            json!({ "error": error_text }),
        )
        .await;
        self.gateway
            .push_status(order_id, failure_status.as_str())
            .await;

        // Ack the failed delivery before republishing: a broker requeue
        // would reuse the same x-retries header on every round.
        acker.ack().await?;

        let next_retry = retries + 1;
        if self.retry_policy.should_retry(next_retry) {
            let ttl_ms = self.retry_policy.ttl_for_attempt(next_retry);
            self.router
                .publish_retry(body, &envelope.event_id, next_retry, ttl_ms)
                .await?;
            info!(order_id = %order_id, retry = next_retry, ttl_ms, "Retry scheduled");
            audit(
                self.events.as_ref(),
                order_id,
                audit_event::RETRY_SCHEDULED,
                json!({ "retry": next_retry, "ttl_ms": ttl_ms }),
            )
            .await;
            Ok(MessageOutcome::Retried {
                retry: next_retry,
                ttl_ms,
            })
        } else {
            self.router
                .publish_dlq(body, &envelope.event_id, retries, &error_text)
                .await?;
            self.store
                .update_status(order_id, OrderStatus::Dlq, None, false)
                .await?;
            warn!(order_id = %order_id, retries, "Retry budget exhausted, parked on DLQ");
            audit(
                self.events.as_ref(),
                order_id,
                audit_event::DLQ,
                json!({ "reason": error_text }),
            )
            .await;
            self.gateway
                .push_status(order_id, OrderStatus::Dlq.as_str())
                .await;
            Ok(MessageOutcome::DeadLettered { reason: error_text })
        }
    }

    /// Status update + audit + live push, the bundle every transition
    /// goes through.
    async fn transition(
        &self,
        order_id: &str,
        status: OrderStatus,
        details: serde_json::Value,
    ) -> Result<()> {
        self.store
            .update_status(order_id, status, None, false)
            .await?;
        audit(self.events.as_ref(), order_id, status.as_str(), details).await;
        self.gateway.push_status(order_id, status.as_str()).await;
        Ok(())
    }

    async fn demo_pause(&self, duration: Duration) {
        if self.demo_delays {
            tokio::time::sleep(duration).await;
        }
    }
}
