//! WMS adapter: line-oriented TCP warehouse management.
//!
//! One command, one reply line, close. The WMS acks package reservation
//! with a line starting `OK|` or `ACK|`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{AdapterError, BackendAdapter, Stage};

const WMS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WmsAdapter {
    host: String,
    port: u16,
}

impl WmsAdapter {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn is_ack(reply: &str) -> bool {
        reply.starts_with("OK|") || reply.starts_with("ACK|")
    }
}

#[async_trait]
impl BackendAdapter for WmsAdapter {
    fn stage(&self) -> Stage {
        Stage::Wms
    }

    async fn execute(&self, order_id: &str) -> Result<Option<serde_json::Value>, AdapterError> {
        let addr = format!("{}:{}", self.host, self.port);

        let stream = timeout(WMS_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| AdapterError::Wms(format!("connect to {addr} timed out")))?
            .map_err(|e| AdapterError::Wms(format!("connect to {addr} failed: {e}")))?;

        let mut stream = BufReader::new(stream);

        let command = format!("ADD_PACKAGE|{order_id}\n");
        timeout(WMS_TIMEOUT, stream.get_mut().write_all(command.as_bytes()))
            .await
            .map_err(|_| AdapterError::Wms("send timed out".to_string()))?
            .map_err(|e| AdapterError::Wms(format!("send failed: {e}")))?;

        let mut line = String::new();
        timeout(WMS_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| AdapterError::Wms("reply timed out".to_string()))?
            .map_err(|e| AdapterError::Wms(format!("read failed: {e}")))?;

        let reply = line.trim();
        if !Self::is_ack(reply) {
            return Err(AdapterError::Wms(format!("unexpected reply: {reply:?}")));
        }

        debug!(order_id = %order_id, reply = %reply, "WMS reserved package");

        Ok(None)
    }
}
