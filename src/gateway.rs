//! HTTP backend for transmitting reading batches.
//!
//! Batches are posted to a local or remote ingest gateway with bearer
//! authentication. The same gateway's health endpoint doubles as the login
//! probe for the coordinator's session.

use crate::coordinator::{LoginOutcome, SessionBackend};
use crate::transmit::{BufferFlusher, ReadingBatch, ReadingBuffer, TransmitError};
use crate::transparency::SharedTransparencyLog;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Batches kept for retry while the gateway is unreachable.
const MAX_PENDING_BATCHES: usize = 100;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    pub host: String,
    /// Gateway port
    pub port: u16,
    /// Bearer authentication token
    pub token: String,
}

impl GatewayConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    /// Load configuration from the runtime directory.
    ///
    /// Reads `gateway.port` and `gateway.token` from `<data_path>/runtime/`.
    pub fn from_runtime_dir(data_path: &std::path::Path) -> Result<Self, GatewayError> {
        let runtime_dir = data_path.join("runtime");

        let port_path = runtime_dir.join("gateway.port");
        let token_path = runtime_dir.join("gateway.token");

        let port_str = std::fs::read_to_string(&port_path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read gateway port from {port_path:?}: {e}"
            ))
        })?;

        let port: u16 = port_str.trim().parse().map_err(|e| {
            GatewayError::Config(format!("Invalid port number '{}': {}", port_str.trim(), e))
        })?;

        let token = std::fs::read_to_string(&token_path)
            .map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to read gateway token from {token_path:?}: {e}"
                ))
            })?
            .trim()
            .to_string();

        Ok(Self {
            host: "127.0.0.1".to_string(),
            port,
            token,
        })
    }

    /// Default runtime directory root.
    pub fn default_data_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sense-platform")
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ingest_url(&self) -> String {
        format!("{}/v1/ingest", self.url())
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.url())
    }
}

/// Gateway client error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway config error: {0}")]
    Config(String),
    #[error("Gateway network error: {0}")]
    Network(String),
    #[error("Gateway server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Gateway serialization error: {0}")]
    Serialization(String),
}

impl From<GatewayError> for TransmitError {
    fn from(e: GatewayError) -> Self {
        TransmitError::Upload(e.to_string())
    }
}

/// Response from the ingest endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    /// Number of readings the gateway accepted
    #[serde(default)]
    pub accepted: usize,
    /// Server-side processing timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Async gateway client.
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Probe the health endpoint with our credentials.
    pub async fn login(&self) -> LoginOutcome {
        let response = self
            .client
            .get(self.config.health_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => LoginOutcome::Success,
            Ok(r) if r.status().as_u16() == 401 || r.status().as_u16() == 403 => {
                LoginOutcome::Forbidden
            }
            Ok(r) => {
                tracing::debug!("Gateway health check returned {}", r.status());
                LoginOutcome::Failed
            }
            Err(e) => {
                tracing::debug!("Gateway unreachable: {e}");
                LoginOutcome::Failed
            }
        }
    }

    /// Post one batch to the ingest endpoint.
    pub async fn upload(&self, batch: &ReadingBatch) -> Result<IngestResponse, GatewayError> {
        let response = self
            .client
            .post(self.config.ingest_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .json(batch)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Serialization(e.to_string()))
    }
}

/// Blocking gateway client for the transmit and connection threads.
pub struct BlockingGatewayClient {
    inner: GatewayClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: GatewayClient::new(config)?,
            runtime,
        })
    }

    pub fn login(&self) -> LoginOutcome {
        self.runtime.block_on(self.inner.login())
    }

    pub fn upload(&self, batch: &ReadingBatch) -> Result<IngestResponse, GatewayError> {
        self.runtime.block_on(self.inner.upload(batch))
    }
}

/// Login probe backed by the gateway health endpoint.
pub struct GatewaySession {
    client: Arc<BlockingGatewayClient>,
}

impl GatewaySession {
    pub fn new(client: Arc<BlockingGatewayClient>) -> Self {
        Self { client }
    }
}

impl SessionBackend for GatewaySession {
    fn login(&self) -> LoginOutcome {
        self.client.login()
    }
}

/// Flusher uploading buffered readings to the gateway.
///
/// Batches that fail to upload are kept and retried first on the next
/// flush, up to a bounded backlog.
pub struct GatewayFlusher {
    buffer: Arc<ReadingBuffer>,
    client: Arc<BlockingGatewayClient>,
    device_id: String,
    batch_size: usize,
    pending: Mutex<Vec<ReadingBatch>>,
    transparency: Option<SharedTransparencyLog>,
}

impl GatewayFlusher {
    pub fn new(
        buffer: Arc<ReadingBuffer>,
        client: Arc<BlockingGatewayClient>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            buffer,
            client,
            device_id: device_id.into(),
            batch_size: crate::transmit::spool::DEFAULT_BATCH_SIZE,
            pending: Mutex::new(Vec::new()),
            transparency: None,
        }
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    /// Batches waiting for retry.
    pub fn pending_batches(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl BufferFlusher for GatewayFlusher {
    fn flush(&self) -> Result<usize, TransmitError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| TransmitError::Upload("pending batch lock poisoned".to_string()))?;

        loop {
            let readings = self.buffer.drain(self.batch_size);
            if readings.is_empty() {
                break;
            }
            pending.push(ReadingBatch::new(self.device_id.clone(), readings));
        }
        if pending.len() > MAX_PENDING_BATCHES {
            let excess = pending.len() - MAX_PENDING_BATCHES;
            tracing::warn!("Discarding {excess} oldest batches awaiting upload");
            pending.drain(..excess);
        }

        let mut sent = 0;
        while let Some(batch) = pending.first() {
            match self.client.upload(batch) {
                Ok(response) => {
                    tracing::debug!(
                        "Gateway accepted {} of {} readings",
                        response.accepted,
                        batch.len()
                    );
                    if let Some(log) = &self.transparency {
                        log.record_batch(batch.len() as u64);
                    }
                    sent += batch.len();
                    pending.remove(0);
                }
                Err(e) => {
                    tracing::warn!("{} batches kept for retry", pending.len());
                    return Err(e.into());
                }
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_url() {
        let config = GatewayConfig::new("127.0.0.1", 8080, "test-token");
        assert_eq!(config.url(), "http://127.0.0.1:8080");
        assert_eq!(config.ingest_url(), "http://127.0.0.1:8080/v1/ingest");
        assert_eq!(config.health_url(), "http://127.0.0.1:8080/health");
    }

    #[test]
    fn test_runtime_dir_config() {
        let dir = std::env::temp_dir().join(format!("sense-gateway-{}", uuid::Uuid::new_v4()));
        let runtime = dir.join("runtime");
        std::fs::create_dir_all(&runtime).unwrap();
        std::fs::write(runtime.join("gateway.port"), "9123\n").unwrap();
        std::fs::write(runtime.join("gateway.token"), "secret\n").unwrap();

        let config = GatewayConfig::from_runtime_dir(&dir).unwrap();
        assert_eq!(config.port, 9123);
        assert_eq!(config.token, "secret");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_runtime_dir_is_config_error() {
        let dir = std::env::temp_dir().join(format!("sense-gateway-{}", uuid::Uuid::new_v4()));
        assert!(matches!(
            GatewayConfig::from_runtime_dir(&dir),
            Err(GatewayError::Config(_))
        ));
    }
}
