//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Priority;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max tasks in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Max task starts per interval window; unset means unbounded
    #[serde(default, rename = "interval-cap")]
    pub interval_cap: Option<usize>,

    /// Interval window length in milliseconds; 0 disables the window
    #[serde(default, rename = "interval-ms")]
    pub interval_ms: u64,

    /// Count tasks still running at a window boundary against the next window
    #[serde(default, rename = "carry-over")]
    pub carry_over: bool,

    /// Priority used for work submitted without an explicit one
    #[serde(default, rename = "priority")]
    pub default_priority: Priority,
}

fn default_concurrency() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            interval_cap: None,
            interval_ms: 0,
            carry_over: false,
            default_priority: Priority::NORMAL,
        }
    }
}

impl SchedulerConfig {
    /// Unlimited starts, the given number in flight
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// The interval window, if both a cap and a non-zero length are set
    pub fn interval(&self) -> Option<Duration> {
        match self.interval_cap {
            Some(_) if self.interval_ms > 0 => Some(Duration::from_millis(self.interval_ms)),
            _ => None,
        }
    }
}
