/// Relay configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub rabbit_url: String,
    pub gateway_url: String,
    /// Rows claimed per polling cycle.
    pub batch_size: i64,
    /// Sleep between cycles when the outbox is empty.
    pub idle_sleep_ms: u64,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(RelayConfig {
            rabbit_url: std::env::var("RABBIT_URL")
                .map_err(|_| "RABBIT_URL environment variable not set")?,
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://api-gateway:8000".to_string()),
            batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            idle_sleep_ms: std::env::var("OUTBOX_IDLE_SLEEP_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
        })
    }
}
