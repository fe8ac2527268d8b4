//! Backoff delay curve

use std::time::Duration;

use rand::Rng;

use super::config::RetryConfig;

/// Delay before retry number `retry` (counted from zero)
///
/// `min(max_delay, base_delay * factor^retry * jitter)` where jitter is drawn
/// uniformly from [1, 2) when enabled.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let jitter = if config.jitter {
        rand::rng().random_range(1.0..2.0)
    } else {
        1.0
    };
    scaled_delay(config, retry, jitter)
}

/// Delay for a fixed jitter multiplier
pub fn scaled_delay(config: &RetryConfig, retry: u32, jitter: f64) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let raw = config.base_delay_ms as f64 * config.factor.powi(exponent) * jitter;
    // f64::min discards NaN, so an overflowed curve still lands on the cap
    let capped = raw.min(config.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}
