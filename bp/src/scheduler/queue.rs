//! Queue types for the scheduler

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::SchedulerError;
use crate::domain::Priority;

/// Deferred unit of work, type-erased once its output channel is attached
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A task waiting to start
pub(crate) struct QueuedTask {
    pub priority: Priority,
    pub seq: u64,
    pub submitted_at: Instant,
    pub job: Job,
}

impl Eq for QueuedTask {}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier submission
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Completion handle returned by `submit`
///
/// Resolves to the task's output, or to an error if the task was cleared
/// from the queue or panicked.
#[derive(Debug)]
pub struct TaskHandle<T> {
    pub(crate) rx: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchedulerError::Cancelled)))
    }
}

/// Lifecycle signals raised by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task started while nothing else was running
    Active,

    /// The last waiting task was dequeued
    Empty,

    /// Queue empty and every running task finished
    Idle,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_started: u64,
    pub total_completed: u64,
    pub total_cleared: u64,
    pub total_interval_throttled: u64,
    pub total_wait_time_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone)]
pub struct QueueState {
    pub running: usize,
    pub queued: usize,
    pub paused: bool,
    pub started_in_window: usize,
    pub stats: SchedulerStats,
}

/// Counts published on every state change so waiters never miss a transition
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Occupancy {
    pub queued: usize,
    pub running: usize,
}
