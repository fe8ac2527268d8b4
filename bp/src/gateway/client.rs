//! HTTP client for the ingestion endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use super::config::GatewayConfig;
use super::error::IngestError;
use crate::domain::Record;

/// What the endpoint advertised when probed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Batch endpoint available
    pub batch: bool,

    /// Server-side body size limit, if advertised
    pub size_limit: Option<usize>,
}

impl Capability {
    pub fn unsupported() -> Self {
        Self {
            batch: false,
            size_limit: None,
        }
    }
}

/// Transport used by the gateway
///
/// Each method is a single attempt; retry lives in the gateway.
#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Ask the endpoint whether it accepts batches
    async fn probe(&self) -> Result<Capability, IngestError>;

    /// POST one assembled batch body
    async fn send_batch(&self, body: String) -> Result<(), IngestError>;

    /// POST a single create record
    async fn create(&self, record: &Record) -> Result<(), IngestError>;

    /// PATCH a single update record
    async fn update(&self, record: &Record) -> Result<(), IngestError>;
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    batch_ingest_config: Option<BatchIngestConfig>,
}

#[derive(Debug, Deserialize)]
struct BatchIngestConfig {
    #[serde(default)]
    size_limit_bytes: Option<usize>,
}

/// reqwest-backed [`IngestClient`]
pub struct HttpIngestClient {
    config: GatewayConfig,
    api_key: Option<String>,
    http: Client,
}

impl HttpIngestClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, IngestError> {
        debug!(base_url = %config.base_url, "HttpIngestClient::from_config: called");
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(IngestError::Network)?;

        Ok(Self {
            api_key: config.api_key(),
            config: config.clone(),
            http,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, IngestError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout(self.config.timeout())
            } else {
                IngestError::Network(e)
            }
        })?;
        check_status(response).await
    }
}

/// Turn a non-success response into the matching error
async fn check_status(response: Response) -> Result<Response, IngestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let message = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), ?retry_after, "check_status: error response");
    Err(IngestError::from_status(status.as_u16(), message, retry_after))
}

/// `retry-after` header in whole seconds
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn probe(&self) -> Result<Capability, IngestError> {
        let url = self.config.url(&self.config.info_path);
        debug!(%url, "probe: called");

        let response = self.execute(self.http.get(&url)).await?;
        let text = response.text().await.map_err(IngestError::Network)?;
        let info: InfoResponse =
            serde_json::from_str(&text).map_err(|e| IngestError::MalformedResponse(e.to_string()))?;

        let capability = Capability {
            batch: true,
            size_limit: info.batch_ingest_config.and_then(|c| c.size_limit_bytes),
        };
        debug!(?capability, "probe: success");
        Ok(capability)
    }

    async fn send_batch(&self, body: String) -> Result<(), IngestError> {
        let url = self.config.url(&self.config.batch_path);
        debug!(%url, bytes = body.len(), "send_batch: called");

        let request = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .body(body);
        self.execute(request).await?;
        debug!("send_batch: success");
        Ok(())
    }

    async fn create(&self, record: &Record) -> Result<(), IngestError> {
        let url = self.config.url(&self.config.records_path);
        debug!(%url, id = %record.id, "create: called");

        self.execute(self.http.post(&url).json(&record.to_wire())).await?;
        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<(), IngestError> {
        let url = self.config.url(&format!("{}/{}", self.config.records_path, record.id));
        debug!(%url, id = %record.id, "update: called");

        self.execute(self.http.patch(&url).json(&record.to_wire())).await?;
        Ok(())
    }
}
