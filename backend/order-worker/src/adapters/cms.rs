//! CMS adapter: legacy SOAP order management.
//!
//! The CMS accepts a minimal CreateOrder envelope and replies with an XML
//! body the pipeline treats as opaque; any 2xx is success.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{AdapterError, BackendAdapter, Stage};

const CMS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CmsAdapter {
    client: reqwest::Client,
    url: String,
}

impl CmsAdapter {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn soap_envelope(order_id: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<Envelope>
  <Body>
    <CreateOrder>
      <OrderId>{order_id}</OrderId>
    </CreateOrder>
  </Body>
</Envelope>
"#
        )
    }
}

#[async_trait]
impl BackendAdapter for CmsAdapter {
    fn stage(&self) -> Stage {
        Stage::Cms
    }

    async fn execute(&self, order_id: &str) -> Result<Option<serde_json::Value>, AdapterError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(CMS_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(Self::soap_envelope(order_id))
            .send()
            .await
            .map_err(|e| AdapterError::Cms(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdapterError::Cms(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        debug!(order_id = %order_id, "CMS accepted order");

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_stub;

    #[tokio::test]
    async fn test_execute_accepts_2xx() {
        let port = http_stub::serve_once("HTTP/1.1 200 OK", "<CreateOrderResponse/>").await;
        let adapter = CmsAdapter::new(
            reqwest::Client::new(),
            format!("http://127.0.0.1:{port}/soap"),
        );

        assert!(adapter.execute("ORD-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_rejects_5xx() {
        let port = http_stub::serve_once("HTTP/1.1 502 Bad Gateway", "upstream down").await;
        let adapter = CmsAdapter::new(
            reqwest::Client::new(),
            format!("http://127.0.0.1:{port}/soap"),
        );

        let err = adapter.execute("ORD-1").await.unwrap_err();
        assert!(err.to_string().contains("cms"));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_soap_envelope_shape() {
        let envelope = CmsAdapter::soap_envelope("ORD-1");

        assert!(envelope.starts_with("<?xml version=\"1.0\"?>"));
        assert!(envelope.contains("<Envelope>"));
        assert!(envelope.contains("<Body>"));
        assert!(envelope.contains("<CreateOrder>"));
        assert!(envelope.contains("<OrderId>ORD-1</OrderId>"));
        assert!(envelope.trim_end().ends_with("</Envelope>"));
    }
}
