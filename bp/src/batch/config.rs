//! Batch accumulator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Batch accumulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Delay armed by the first append after the buffer was idle
    #[serde(default = "default_first_hit_delay_ms", rename = "first-hit-delay-ms")]
    pub first_hit_delay_ms: u64,

    /// Delay re-armed by every later append while a flush is pending
    #[serde(default = "default_coalescing_delay_ms", rename = "coalescing-delay-ms")]
    pub coalescing_delay_ms: u64,

    /// Buffer length that forces an immediate drain
    #[serde(default = "default_high_water_mark", rename = "high-water-mark")]
    pub high_water_mark: usize,

    /// Most records handed to the sink in one delivery
    #[serde(default = "default_max_batch_items", rename = "max-batch-items")]
    pub max_batch_items: usize,

    /// Channel buffer size for accumulator requests
    #[serde(default = "default_channel_buffer", rename = "channel-buffer")]
    pub channel_buffer: usize,
}

fn default_first_hit_delay_ms() -> u64 {
    250
}

fn default_coalescing_delay_ms() -> u64 {
    50
}

fn default_high_water_mark() -> usize {
    100
}

fn default_max_batch_items() -> usize {
    100
}

fn default_channel_buffer() -> usize {
    1024
}

impl Default for BatchConfig {
    fn default() -> Self {
        debug!("BatchConfig::default: called");
        Self {
            first_hit_delay_ms: default_first_hit_delay_ms(),
            coalescing_delay_ms: default_coalescing_delay_ms(),
            high_water_mark: default_high_water_mark(),
            max_batch_items: default_max_batch_items(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl BatchConfig {
    pub fn first_hit_delay(&self) -> Duration {
        Duration::from_millis(self.first_hit_delay_ms)
    }

    pub fn coalescing_delay(&self) -> Duration {
        Duration::from_millis(self.coalescing_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.first_hit_delay(), Duration::from_millis(250));
        assert_eq!(config.coalescing_delay(), Duration::from_millis(50));
        assert_eq!(config.high_water_mark, 100);
        assert_eq!(config.max_batch_items, 100);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: BatchConfig = serde_yaml::from_str("high-water-mark: 5\nfirst-hit-delay-ms: 10\n").unwrap();
        assert_eq!(config.high_water_mark, 5);
        assert_eq!(config.first_hit_delay_ms, 10);
        assert_eq!(config.coalescing_delay_ms, 50);
        assert_eq!(config.channel_buffer, 1024);
    }
}
