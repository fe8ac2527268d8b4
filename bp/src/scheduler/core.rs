//! Scheduler implementation

use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::queue::{Job, Occupancy, QueueState, QueuedTask, SchedulerEvent, SchedulerStats, TaskHandle};
use crate::domain::Priority;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Internal state protected by mutex
struct SchedulerInner {
    /// Priority queue of waiting tasks
    queue: BinaryHeap<QueuedTask>,

    /// Submission counter used as the FIFO tie-break
    next_seq: u64,

    /// Tasks currently running
    running: usize,

    /// Starts counted against the current interval window
    started_in_window: usize,

    /// End of the current interval window, if one is open
    window_ends: Option<Instant>,

    /// Whether a window-boundary timer is pending
    timer_armed: bool,

    paused: bool,

    /// Statistics
    stats: SchedulerStats,
}

struct Shared {
    config: SchedulerConfig,
    inner: Mutex<SchedulerInner>,
    occupancy: watch::Sender<Occupancy>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// The PriorityScheduler owns submitted tasks and starts them in priority
/// order under a concurrency cap and an optional interval start cap.
///
/// Cloning is cheap and every clone drives the same queue, so one scheduler
/// can be constructed by the application and injected into collaborators.
#[derive(Clone)]
pub struct PriorityScheduler {
    shared: Arc<Shared>,
}

impl PriorityScheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        debug!(?config, "PriorityScheduler::new: called");
        let (occupancy, _) = watch::channel(Occupancy::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(SchedulerInner {
                    queue: BinaryHeap::new(),
                    next_seq: 0,
                    running: 0,
                    started_in_window: 0,
                    window_ends: None,
                    timer_armed: false,
                    paused: false,
                    stats: SchedulerStats::default(),
                }),
                occupancy,
                events,
            }),
        }
    }

    /// The configuration this scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queue a task and return a handle resolving to its output
    ///
    /// The task is not started inside this call unless a slot is free; the
    /// handle can be awaited or dropped without affecting execution.
    pub async fn submit<F, Fut, T>(&self, priority: impl Into<Priority>, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let priority = priority.into();
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let outcome = AssertUnwindSafe(async move { task().await }).catch_unwind().await;
                let _ = tx.send(outcome.map_err(|_| SchedulerError::Panicked));
            }
            .boxed()
        });

        {
            let mut inner = self.shared.inner.lock().await;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.queue.push(QueuedTask {
                priority,
                seq,
                submitted_at: Instant::now(),
                job,
            });
            inner.stats.total_submitted += 1;
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
            debug!(%priority, seq, queued = inner.queue.len(), "PriorityScheduler::submit: queued");
            self.shared.publish(&inner);
        }

        self.shared.tick().await;
        TaskHandle { rx }
    }

    /// Submit with the configured default priority
    pub async fn submit_default<F, Fut, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(self.shared.config.default_priority, task).await
    }

    /// Stop starting queued tasks; running tasks are unaffected
    pub async fn pause(&self) {
        debug!("PriorityScheduler::pause: called");
        self.shared.inner.lock().await.paused = true;
    }

    /// Resume starting queued tasks
    pub async fn resume(&self) {
        debug!("PriorityScheduler::resume: called");
        {
            let mut inner = self.shared.inner.lock().await;
            if !inner.paused {
                debug!("PriorityScheduler::resume: not paused");
                return;
            }
            inner.paused = false;
        }
        self.shared.tick().await;
    }

    pub async fn is_paused(&self) -> bool {
        self.shared.inner.lock().await.paused
    }

    /// Drop every task that has not started; their handles resolve `Cancelled`
    pub async fn clear(&self) -> usize {
        let mut inner = self.shared.inner.lock().await;
        let cleared = inner.queue.len();
        inner.queue.clear();
        inner.stats.total_cleared += cleared as u64;
        debug!(cleared, "PriorityScheduler::clear: dropped queued tasks");
        if cleared > 0 && inner.running == 0 {
            info!(completed = inner.stats.total_completed, "Scheduler idle");
            let _ = self.shared.events.send(SchedulerEvent::Idle);
        }
        self.shared.publish(&inner);
        cleared
    }

    /// Resolves once no task is waiting to start
    pub async fn wait_until_empty(&self) {
        let mut rx = self.shared.occupancy.subscribe();
        let _ = rx.wait_for(|o| o.queued == 0).await;
    }

    /// Resolves once the queue is empty and no task is running
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.occupancy.subscribe();
        let _ = rx.wait_for(|o| o.queued == 0 && o.running == 0).await;
    }

    /// Number of tasks waiting to start
    pub fn size(&self) -> usize {
        self.shared.occupancy.borrow().queued
    }

    /// Number of tasks currently running
    pub fn pending(&self) -> usize {
        self.shared.occupancy.borrow().running
    }

    /// Receive lifecycle events raised after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        let inner = self.shared.inner.lock().await;
        QueueState {
            running: inner.running,
            queued: inner.queue.len(),
            paused: inner.paused,
            started_in_window: inner.started_in_window,
            stats: inner.stats.clone(),
        }
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        self.shared.inner.lock().await.stats.clone()
    }
}

impl Shared {
    /// Start as many queued tasks as the concurrency and interval caps allow
    async fn tick(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            self.roll_window(&mut inner, now);

            while !inner.paused && inner.running < self.config.concurrency && !inner.queue.is_empty() {
                if !self.interval_allows(&inner) {
                    debug!(
                        started = inner.started_in_window,
                        "Shared::tick: interval cap reached, waiting for window boundary"
                    );
                    inner.stats.total_interval_throttled += 1;
                    self.arm_window_timer(&mut inner);
                    break;
                }

                let Some(task) = inner.queue.pop() else {
                    break;
                };

                if inner.running == 0 {
                    let _ = self.events.send(SchedulerEvent::Active);
                }
                inner.running += 1;
                inner.started_in_window += 1;
                if inner.window_ends.is_none()
                    && let Some(interval) = self.config.interval()
                {
                    inner.window_ends = Some(now + interval);
                }

                inner.stats.total_started += 1;
                inner.stats.total_wait_time_ms += now.duration_since(task.submitted_at).as_millis() as u64;
                inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.running);
                debug!(priority = %task.priority, seq = task.seq, running = inner.running, "Shared::tick: starting task");

                if inner.queue.is_empty() {
                    let _ = self.events.send(SchedulerEvent::Empty);
                }
                ready.push(task.job);
            }

            self.publish(&inner);
        }

        for job in ready {
            self.start(job);
        }
    }

    fn start(self: &Arc<Self>, job: Job) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            job().await;
            shared.finish().await;
        });
    }

    async fn finish(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.running -= 1;
            inner.stats.total_completed += 1;
            if inner.running == 0 && inner.queue.is_empty() {
                info!(completed = inner.stats.total_completed, "Scheduler idle");
                let _ = self.events.send(SchedulerEvent::Idle);
            }
            self.publish(&inner);
        }
        self.tick().await;
    }

    /// Reset the start counter once the current window has ended
    fn roll_window(&self, inner: &mut SchedulerInner, now: Instant) {
        let Some(ends) = inner.window_ends else {
            return;
        };
        if now < ends {
            return;
        }

        inner.started_in_window = if self.config.carry_over { inner.running } else { 0 };
        inner.window_ends = match self.config.interval() {
            // Carried-over starts must expire with a window of their own
            Some(interval) if inner.started_in_window > 0 => Some(now + interval),
            _ => None,
        };
        debug!(
            started = inner.started_in_window,
            "Shared::roll_window: interval boundary reached"
        );
    }

    fn interval_allows(&self, inner: &SchedulerInner) -> bool {
        match (self.config.interval_cap, self.config.interval()) {
            (Some(cap), Some(_)) => inner.started_in_window < cap,
            _ => true,
        }
    }

    fn arm_window_timer(self: &Arc<Self>, inner: &mut SchedulerInner) {
        if inner.timer_armed {
            return;
        }
        let Some(ends) = inner.window_ends else {
            return;
        };
        inner.timer_armed = true;

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(ends).await;
            shared.inner.lock().await.timer_armed = false;
            shared.tick().await;
        });
    }

    fn publish(&self, inner: &SchedulerInner) {
        self.occupancy.send_replace(Occupancy {
            queued: inner.queue.len(),
            running: inner.running,
        });
    }
}
