//! The relay loop that drains the outbox into the broker.

use std::sync::Arc;
use std::time::Duration;

use amqp_utils as amqp;
use async_trait::async_trait;
use lapin::Channel;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::metrics::OutboxMetrics;
use crate::{OutboxError, OutboxEvent, OutboxRepository, OutboxResult};

/// Hook invoked after a row is confirmed by the broker and deleted.
///
/// The relay itself knows nothing about orders; the service layers a
/// listener on top to flip order status to QUEUED, audit, and push the
/// transition to the live channel.
#[async_trait]
pub trait PublishListener: Send + Sync {
    async fn published(&self, event: &OutboxEvent);
}

/// Listener that does nothing.
pub struct NoopListener;

#[async_trait]
impl PublishListener for NoopListener {
    async fn published(&self, _event: &OutboxEvent) {}
}

/// Long-running publisher: claims pending rows in id order, publishes each
/// to the main queue with the row id as correlation id, and deletes rows
/// the broker confirmed. Reconnects forever on broker trouble.
pub struct OutboxRelay<R: OutboxRepository> {
    pool: PgPool,
    repository: Arc<R>,
    rabbit_url: String,
    batch_size: i64,
    idle_sleep: Duration,
    listener: Arc<dyn PublishListener>,
    metrics: Option<OutboxMetrics>,
}

impl<R: OutboxRepository> OutboxRelay<R> {
    pub fn new(
        pool: PgPool,
        repository: Arc<R>,
        rabbit_url: impl Into<String>,
        batch_size: i64,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            pool,
            repository,
            rabbit_url: rabbit_url.into(),
            batch_size,
            idle_sleep,
            listener: Arc::new(NoopListener),
            metrics: None,
        }
    }

    /// Attach a post-publish listener.
    pub fn with_listener(mut self, listener: Arc<dyn PublishListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Attach Prometheus metrics, updated every polling cycle.
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run forever. Broker failures rebuild the channel; database failures
    /// are logged and retried on the next cycle. Rows are only lost to the
    /// broker, never to a crash: anything unconfirmed stays in the table.
    pub async fn run(&self) {
        info!(
            batch_size = self.batch_size,
            idle_sleep_ms = self.idle_sleep.as_millis() as u64,
            "Outbox relay starting"
        );

        loop {
            let connection = amqp::connect_with_retry(&self.rabbit_url).await;

            let channel = match amqp::open_channel(&connection).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(error = %e, "Failed to open relay channel");
                    sleep(self.idle_sleep).await;
                    continue;
                }
            };
            if let Err(e) = amqp::declare_topology(&channel).await {
                warn!(error = %e, "Failed to declare broker topology");
                sleep(self.idle_sleep).await;
                continue;
            }

            info!("Outbox relay publishing");

            loop {
                match self.drain_batch(&channel).await {
                    Ok(0) => {
                        debug!("No pending outbox rows");
                        self.update_gauges().await;
                        sleep(self.idle_sleep).await;
                    }
                    Ok(count) => {
                        info!(published_count = count, "Published outbox batch");
                        self.update_gauges().await;
                    }
                    Err(OutboxError::Publish(e)) => {
                        warn!(error = %e, "Broker publish failed, rebuilding channel");
                        if let Some(metrics) = &self.metrics {
                            metrics.publish_failures.inc();
                        }
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Outbox relay database error");
                        sleep(self.idle_sleep).await;
                    }
                }
            }
        }
    }

    /// Claim one batch, publish in ascending id order, delete confirmed
    /// rows, commit. On the first publish failure the rest of the batch is
    /// left untouched so per-aggregate FIFO survives the rebuild.
    async fn drain_batch(&self, channel: &Channel) -> OutboxResult<usize> {
        let mut tx = self.pool.begin().await?;
        let batch = self.repository.claim_batch(&mut tx, self.batch_size).await?;

        if batch.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut published: Vec<OutboxEvent> = Vec::with_capacity(batch.len());
        let mut publish_error: Option<amqp::BrokerError> = None;

        for event in batch {
            let body = event.envelope().to_bytes();
            let correlation_id = event.id.to_string();

            match amqp::publish_main(channel, &body, &correlation_id).await {
                Ok(()) => {
                    self.repository.delete(&mut tx, event.id).await?;
                    debug!(
                        outbox_id = event.id,
                        aggregate_id = %event.aggregate_id,
                        "Outbox row published and deleted"
                    );
                    published.push(event);
                }
                Err(e) => {
                    publish_error = Some(e);
                    break;
                }
            }
        }

        // Commit deletes only for rows the broker confirmed; unpublished
        // claims unlock here and will be re-claimed next cycle.
        tx.commit().await?;

        for event in &published {
            self.listener.published(event).await;
            if let Some(metrics) = &self.metrics {
                metrics.published.inc();
            }
        }

        match publish_error {
            Some(e) => Err(OutboxError::Publish(e)),
            None => Ok(published.len()),
        }
    }

    async fn update_gauges(&self) {
        if let Some(metrics) = &self.metrics {
            if let Ok((pending, age)) = self.repository.pending_stats().await {
                metrics.pending.set(pending);
                metrics.oldest_pending_age_seconds.set(age);
            }
        }
    }
}
