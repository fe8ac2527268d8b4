//! Priority scheduler for units of work
//!
//! Owns submitted tasks until they complete, starting them in priority order
//! under a concurrency cap and an optional per-interval start cap.

mod config;
mod core;
mod error;
mod queue;

pub use config::SchedulerConfig;
pub use core::PriorityScheduler;
pub use error::SchedulerError;
pub use queue::{QueueState, SchedulerEvent, SchedulerStats, TaskHandle};
