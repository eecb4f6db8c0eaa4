//! AMQP consume loop.
//!
//! One connection, one channel, prefetch 1: a worker owns a single
//! in-flight delivery at a time. The loop is wrapped in an outer
//! reconnect loop; any broker trouble tears the session down and rebuilds
//! it (topology declarations are idempotent and re-run every time).
//!
//! Shutdown is cooperative: the in-flight delivery finishes before the
//! channel closes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use amqp_utils as amqp;
use gateway_client::Gateway;
use order_store::{EventLog, OrderStore};

use crate::adapters::BackendAdapter;
use crate::pipeline::{DeliveryAcker, PipelineWorker, RetryRouter};
use crate::retry::RetryPolicy;

/// [`DeliveryAcker`] over a lapin delivery.
pub struct AmqpDeliveryAcker {
    delivery: lapin::message::Delivery,
}

impl AmqpDeliveryAcker {
    pub fn new(delivery: lapin::message::Delivery) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl DeliveryAcker for AmqpDeliveryAcker {
    async fn ack(&self) -> Result<()> {
        self.delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}

/// [`RetryRouter`] backed by the worker's own channel.
pub struct AmqpRetryRouter {
    channel: Channel,
}

impl AmqpRetryRouter {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl RetryRouter for AmqpRetryRouter {
    async fn publish_retry(
        &self,
        body: &[u8],
        correlation_id: &str,
        retries: u32,
        ttl_ms: u64,
    ) -> Result<()> {
        amqp::publish_retry(&self.channel, body, correlation_id, retries, ttl_ms).await?;
        Ok(())
    }

    async fn publish_dlq(
        &self,
        body: &[u8],
        correlation_id: &str,
        retries: u32,
        reason: &str,
    ) -> Result<()> {
        amqp::publish_dlq(&self.channel, body, correlation_id, retries, reason).await?;
        Ok(())
    }
}

/// Everything a consumer session needs besides the broker connection.
pub struct ConsumerDeps {
    pub store: Arc<dyn OrderStore>,
    pub events: Arc<dyn EventLog>,
    pub gateway: Arc<dyn Gateway>,
    pub adapters: Vec<Arc<dyn BackendAdapter>>,
    pub retry_policy: RetryPolicy,
    pub demo_delays: bool,
}

/// Consume the main queue until shutdown. Never returns on broker
/// failure; it reconnects with a short delay instead.
pub async fn run_consumer(
    rabbit_url: &str,
    deps: ConsumerDeps,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            info!("Worker stopped before session start");
            return;
        }

        let connection = amqp::connect_with_retry(rabbit_url).await;

        let channel = match open_session(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "Failed to open consumer session");
                let _ = connection.close(200, "session setup failed").await;
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let consumer_tag = format!("order-worker-{}", Uuid::new_v4());
        let mut consumer = match channel
            .basic_consume(
                amqp::QUEUE_MAIN,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(error = %e, "Failed to register consumer");
                let _ = connection.close(200, "consume failed").await;
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let router = Arc::new(AmqpRetryRouter::new(channel.clone()));
        let worker = PipelineWorker::new(
            deps.store.clone(),
            deps.events.clone(),
            deps.gateway.clone(),
            router,
            deps.adapters.clone(),
            deps.retry_policy,
            deps.demo_delays,
        );

        info!(queue = amqp::QUEUE_MAIN, consumer_tag = %consumer_tag, "Worker consuming");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let retries =
                            amqp::retries_from_headers(delivery.properties.headers().as_ref());
                        let body = delivery.data.clone();
                        let acker = AmqpDeliveryAcker::new(delivery);

                        match worker.process_delivery(&body, retries, &acker).await {
                            Ok(outcome) => {
                                debug!(?outcome, "Delivery handled");
                            }
                            Err(e) => {
                                // The pipeline acks at well-defined
                                // points; whatever was not acked before
                                // the error is redelivered after the
                                // rebuild.
                                error!(error = %e, "Delivery processing failed, rebuilding session");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Consumer stream error, rebuilding session");
                        break;
                    }
                    None => {
                        warn!("Consumer stream ended, rebuilding session");
                        break;
                    }
                }
            }
        }

        if *shutdown.borrow() {
            let _ = connection.close(200, "shutting down").await;
            info!("Worker stopped");
            return;
        }

        let _ = connection.close(200, "rebuilding").await;
        sleep(Duration::from_secs(1)).await;
    }
}

async fn open_session(connection: &lapin::Connection) -> Result<Channel, amqp::BrokerError> {
    let channel = amqp::open_channel(connection).await?;
    amqp::declare_topology(&channel).await?;
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| amqp::BrokerError::ChannelFailed(e.to_string()))?;
    Ok(channel)
}
