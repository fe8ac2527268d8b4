//! Scheduler error types

use thiserror::Error;

/// Why a task handle resolved without the task's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Task was removed from the queue before it started")]
    Cancelled,

    #[error("Task panicked while running")]
    Panicked,
}
