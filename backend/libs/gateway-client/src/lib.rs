//! HTTP client for the intake façade's internal endpoints.
//!
//! The façade owns the WebSocket fan-out; the pipeline only ever POSTs to
//! two internal endpoints, and both pushes are best-effort: a dead façade
//! must never stall order processing, so failures are logged and dropped
//! here rather than surfaced to callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_PUSH_TIMEOUT: Duration = Duration::from_secs(3);
const DRIVER_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Notification payload pushed to a driver's live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub order_id: String,
    pub payload: serde_json::Value,
}

impl DriverNotification {
    /// The notification emitted when an order becomes ready for pickup.
    pub fn new_assignment(order_id: impl Into<String>, status: &str) -> Self {
        Self {
            kind: "NEW_ASSIGNMENT".to_string(),
            order_id: order_id.into(),
            payload: json!({ "status": status }),
        }
    }
}

/// Best-effort push channel to the façade.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Push a status transition for live UI updates.
    async fn push_status(&self, order_id: &str, status: &str);

    /// Push a notification onto a driver's channel.
    async fn notify_driver(&self, driver_id: &str, notification: &DriverNotification);
}

/// reqwest-backed [`Gateway`] against `{base_url}/internal/...`.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn status_url(&self, order_id: &str) -> String {
        format!("{}/internal/orders/{}/status", self.base_url, order_id)
    }

    fn notify_url(&self, driver_id: &str) -> String {
        format!("{}/internal/driver/{}/notify", self.base_url, driver_id)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn push_status(&self, order_id: &str, status: &str) {
        let result = self
            .client
            .post(self.status_url(order_id))
            .timeout(STATUS_PUSH_TIMEOUT)
            .json(&json!({ "status": status }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(order_id = %order_id, status = %status, "Status pushed to gateway");
            }
            Ok(response) => {
                warn!(
                    order_id = %order_id,
                    status = %status,
                    http_status = %response.status(),
                    "Gateway rejected status push"
                );
            }
            Err(e) => {
                warn!(
                    order_id = %order_id,
                    status = %status,
                    error = %e,
                    "Status push failed"
                );
            }
        }
    }

    async fn notify_driver(&self, driver_id: &str, notification: &DriverNotification) {
        let result = self
            .client
            .post(self.notify_url(driver_id))
            .timeout(DRIVER_NOTIFY_TIMEOUT)
            .json(notification)
            .send()
            .await;

        if let Err(e) = result {
            warn!(
                driver_id = %driver_id,
                order_id = %notification.order_id,
                error = %e,
                "Driver notify failed"
            );
        }
    }
}
