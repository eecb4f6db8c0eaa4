//! Thin contract wrappers around the three legacy backends.
//!
//! Each adapter exposes a single capability: `execute(order_id)`. The
//! pipeline knows nothing about SOAP, JSON, or line protocols; it only
//! sees the stage identity and an optional result document (ROS returns
//! the route it computed, the others return nothing).
//!
//! Adapters must be idempotent under replay: a retried order re-runs
//! every stage from the top.

mod cms;
mod ros;
mod wms;

pub use cms::CmsAdapter;
pub use ros::RosAdapter;
pub use wms::WmsAdapter;

use async_trait::async_trait;
use order_store::OrderStatus;
use thiserror::Error;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cms,
    Ros,
    Wms,
}

impl Stage {
    pub fn calling_status(&self) -> OrderStatus {
        match self {
            Stage::Cms => OrderStatus::CmsCalling,
            Stage::Ros => OrderStatus::RosCalling,
            Stage::Wms => OrderStatus::WmsCalling,
        }
    }

    pub fn ok_status(&self) -> OrderStatus {
        match self {
            Stage::Cms => OrderStatus::CmsOk,
            Stage::Ros => OrderStatus::RosOk,
            Stage::Wms => OrderStatus::WmsOk,
        }
    }
}

/// Failures from backend calls.
///
/// The display strings deliberately name the backend: failure
/// classification and the audit trail both key off the error text.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("cms soap request failed: {0}")]
    Cms(String),

    #[error("ros route optimization failed: {0}")]
    Ros(String),

    #[error("wms tcp exchange failed: {0}")]
    Wms(String),
}

/// A pipeline stage call against one backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which stage this adapter implements.
    fn stage(&self) -> Stage;

    /// Invoke the backend for the order. Returns a result document to
    /// merge into the order payload, if the backend produces one.
    async fn execute(&self, order_id: &str) -> Result<Option<serde_json::Value>, AdapterError>;
}

/// Minimal single-request HTTP responder for adapter tests.
#[cfg(test)]
pub(crate) mod http_stub {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with a canned response; returns the
    /// bound port.
    pub async fn serve_once(status_line: &'static str, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];

            // Read up to the header terminator, then drain the request
            // body by content-length so the client finishes writing
            // before the socket closes.
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos;
                }
            };

            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let mut body_read = request.len() - (header_end + 4);
            while body_read < content_length {
                let n = socket.read(&mut buf).await.unwrap();
                body_read += n;
            }

            let response = format!(
                "{status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        port
    }
}
