//! ROS adapter: REST route optimization.
//!
//! Returns the computed route document, which the pipeline persists
//! verbatim under `payload.route`.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{AdapterError, BackendAdapter, Stage};

const ROS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RosAdapter {
    client: reqwest::Client,
    url: String,
}

impl RosAdapter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BackendAdapter for RosAdapter {
    fn stage(&self) -> Stage {
        Stage::Ros
    }

    async fn execute(&self, order_id: &str) -> Result<Option<serde_json::Value>, AdapterError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(ROS_TIMEOUT)
            .json(&json!({ "order_id": order_id }))
            .send()
            .await
            .map_err(|e| AdapterError::Ros(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdapterError::Ros(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let route: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Ros(format!("invalid response body: {e}")))?;

        if !route.is_object() {
            return Err(AdapterError::Ros("response is not a JSON object".to_string()));
        }

        debug!(order_id = %order_id, "ROS returned route");

        Ok(Some(route))
    }
}
