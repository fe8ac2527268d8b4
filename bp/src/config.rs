//! batchpipe configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::BatchConfig;
use crate::gateway::GatewayConfig;
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;

/// Environment variable overriding `sampling.rate`
pub const SAMPLING_RATE_ENV: &str = "BATCHPIPE_SAMPLING_RATE";

/// Main batchpipe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrency and rate limits for submitted work
    pub scheduler: SchedulerConfig,

    /// Retry policy for transmissions
    pub retry: RetryConfig,

    /// Batch buffer timing and sizing
    pub batching: BatchConfig,

    /// Record sampling
    pub sampling: SamplingConfig,

    /// Ingestion endpoint
    pub gateway: GatewayConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            return Err(eyre!("scheduler.concurrency must be at least 1"));
        }
        if self.scheduler.interval_cap == Some(0) {
            return Err(eyre!("scheduler.interval-cap must be at least 1 when set"));
        }
        if self.retry.max_attempts == 0 {
            return Err(eyre!("retry.max-attempts must be at least 1"));
        }
        if !(self.retry.factor >= 1.0) {
            return Err(eyre!("retry.factor must be at least 1.0, got {}", self.retry.factor));
        }
        if self.batching.high_water_mark == 0 {
            return Err(eyre!("batching.high-water-mark must be at least 1"));
        }
        if self.batching.max_batch_items == 0 {
            return Err(eyre!("batching.max-batch-items must be at least 1"));
        }
        if let Some(rate) = self.sampling.rate
            && !(0.0..=1.0).contains(&rate)
        {
            return Err(eyre!("sampling.rate must be within [0, 1], got {}", rate));
        }
        if self.gateway.size_limit_bytes == 0 {
            return Err(eyre!("gateway.size-limit-bytes must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_env()?;
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .batchpipe.yml
        let local_config = PathBuf::from(".batchpipe.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/batchpipe/batchpipe.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("batchpipe").join("batchpipe.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(SAMPLING_RATE_ENV) {
            self.sampling.rate = parse_rate(&raw).context(format!("Invalid {}", SAMPLING_RATE_ENV))?;
        }
        Ok(())
    }
}

/// Parse a sampling rate; empty means unset
fn parse_rate(raw: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let rate: f64 = raw.parse().context(format!("'{}' is not a number", raw))?;
    Ok(Some(rate))
}

/// Sampling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fraction of creates kept; unset keeps everything
    pub rate: Option<f64>,
}
