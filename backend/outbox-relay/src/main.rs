mod config;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::RelayConfig;
use db_pool::{create_pool, DbConfig};
use gateway_client::HttpGateway;
use listener::QueuedTransitionListener;
use order_store::{SqlxEventLog, SqlxOrderStore};
use transactional_outbox::{metrics::OutboxMetrics, OutboxRelay, SqlxOutboxRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting outbox relay");

    let config = RelayConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("invalid relay configuration")?;

    let db_config = DbConfig::from_env("outbox-relay")
        .map_err(anyhow::Error::msg)
        .context("invalid database configuration")?;
    let pool = create_pool(db_config)
        .await
        .context("failed to connect to database")?;
    tracing::info!("Connected to database");

    let repository = Arc::new(SqlxOutboxRepository::new(pool.clone()));
    let store = Arc::new(SqlxOrderStore::new(pool.clone()));
    let events = Arc::new(SqlxEventLog::new(pool.clone()));
    let gateway = Arc::new(HttpGateway::new(config.gateway_url.as_str()));

    let listener = Arc::new(QueuedTransitionListener::new(store, events, gateway));

    let relay = OutboxRelay::new(
        pool.clone(),
        repository,
        config.rabbit_url.clone(),
        config.batch_size,
        Duration::from_millis(config.idle_sleep_ms),
    )
    .with_listener(listener)
    .with_metrics(OutboxMetrics::new("outbox-relay"));

    tokio::select! {
        _ = relay.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    pool.close().await;
    tracing::info!("Outbox relay stopped");

    Ok(())
}
