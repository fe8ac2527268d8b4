//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default byte budget for one batch request body (20 MiB)
pub const DEFAULT_SIZE_LIMIT_BYTES: usize = 20 * 1024 * 1024;

/// Ingestion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Endpoint base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable holding the API key; unset variable means no auth header
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Per-request HTTP timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Byte budget for one batch request body
    #[serde(rename = "size-limit-bytes")]
    pub size_limit_bytes: usize,

    #[serde(rename = "batch-path")]
    pub batch_path: String,

    #[serde(rename = "records-path")]
    pub records_path: String,

    #[serde(rename = "info-path")]
    pub info_path: String,

    /// Run each attempt as a task on the shared scheduler
    #[serde(rename = "use-scheduler")]
    pub use_scheduler: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1984".to_string(),
            api_key_env: "BATCHPIPE_API_KEY".to_string(),
            timeout_ms: 30_000,
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            batch_path: "/runs/batch".to_string(),
            records_path: "/runs".to_string(),
            info_path: "/info".to_string(),
            use_scheduler: true,
        }
    }
}

impl GatewayConfig {
    /// Config pointing at `base_url` with every other field defaulted
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// API key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        debug!(api_key_env = %self.api_key_env, "GatewayConfig::api_key: called");
        std::env::var(&self.api_key_env).ok().filter(|key| !key.trim().is_empty())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
