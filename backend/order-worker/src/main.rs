use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use db_pool::{create_pool, DbConfig};
use gateway_client::HttpGateway;
use order_store::{SqlxEventLog, SqlxOrderStore};
use order_worker::adapters::{BackendAdapter, CmsAdapter, RosAdapter, WmsAdapter};
use order_worker::{run_consumer, ConsumerDeps, RetryPolicy, WorkerConfig};

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

    tracing::info!("Starting order worker");

    let config = WorkerConfig::from_env()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("invalid worker configuration")?;
    tracing::debug!(?config, "Worker configuration loaded");

    let db_config = DbConfig::from_env("order-worker")
        .map_err(anyhow::Error::msg)
        .context("invalid database configuration")?;
    let pool = create_pool(db_config)
        .await
        .context("failed to connect to database")?;
    tracing::info!("Connected to database");

    let store = Arc::new(SqlxOrderStore::new(pool.clone()));
    let events = Arc::new(SqlxEventLog::new(pool.clone()));
    let gateway = Arc::new(HttpGateway::new(config.gateway_url.as_str()));

    let http = reqwest::Client::new();
    let adapters: Vec<Arc<dyn BackendAdapter>> = vec![
        Arc::new(CmsAdapter::new(http.clone(), config.cms_url.as_str())),
        Arc::new(RosAdapter::new(http.clone(), config.ros_url.as_str())),
        Arc::new(WmsAdapter::new(config.wms_host.as_str(), config.wms_port)),
    ];

    let deps = ConsumerDeps {
        store,
        events,
        gateway,
        adapters,
        retry_policy: RetryPolicy {
            max_retries: config.max_retries,
            base_ttl_ms: config.base_retry_ttl_ms,
            max_ttl_ms: config.max_retry_ttl_ms,
        },
        demo_delays: config.demo_delays,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rabbit_url = config.rabbit_url.clone();
    let consumer = tokio::spawn(async move {
        run_consumer(&rabbit_url, deps, shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, draining");

    let _ = shutdown_tx.send(true);
    let _ = consumer.await;

    pool.close().await;
    tracing::info!("Order worker stopped");

    Ok(())
}
