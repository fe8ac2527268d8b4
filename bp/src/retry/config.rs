//! Retry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied per retry
    pub factor: f64,

    /// Upper bound on any single delay in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Multiply each delay by a random factor in [1, 2)
    pub jitter: bool,

    /// Total time budget for the whole sequence; unset means unbounded
    #[serde(rename = "max-retry-time-ms")]
    pub max_retry_time_ms: Option<u64>,

    /// Per-attempt timeout; unset means attempts may run indefinitely
    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 1000,
            factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
            max_retry_time_ms: None,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_retry_time(&self) -> Option<Duration> {
        self.max_retry_time_ms.map(Duration::from_millis)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}
