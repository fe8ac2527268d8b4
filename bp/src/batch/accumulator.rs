//! BatchAccumulator actor and its handle

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::BatchConfig;
use super::item::{BatchError, BatchItem, Delivery, ItemHandle, Outcome, merge_pairs, resolve_all};
use super::state::{FlushAction, FlushEvent, FlushState, Timing, transition};
use crate::domain::Record;
use crate::gateway::IngestError;

/// Destination for drained batches
///
/// Returns one result per record, in the order given.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, records: Vec<Record>) -> Vec<Result<(), Arc<IngestError>>>;
}

/// Requests handled by the accumulator task
#[derive(Debug)]
enum BatchRequest {
    Append(BatchItem),
    Drain {
        max: usize,
        reply: oneshot::Sender<Vec<BatchItem>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running batch accumulator
///
/// Cloneable; the accumulator task exits when `shutdown` is called or every
/// handle has been dropped.
#[derive(Clone)]
pub struct BatchAccumulator {
    tx: mpsc::Sender<BatchRequest>,
}

impl BatchAccumulator {
    /// Start the accumulator task delivering into `sink`
    pub fn spawn(config: BatchConfig, sink: Arc<dyn BatchSink>) -> Self {
        debug!(?config, "BatchAccumulator::spawn: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (in_flight, _) = watch::channel(0usize);
        let (deliveries, queue) = mpsc::unbounded_channel();
        tokio::spawn(deliver_in_order(sink, queue));
        let actor = Accumulator {
            timing: Timing {
                first_hit: config.first_hit_delay(),
                coalescing: config.coalescing_delay(),
                high_water_mark: config.high_water_mark.max(1),
            },
            max_batch_items: config.max_batch_items.max(1),
            deliveries,
            rx,
            buffer: VecDeque::new(),
            state: FlushState::Idle,
            deadline: None,
            in_flight: Arc::new(in_flight),
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Buffer `record`; the handle resolves once its delivery settles
    pub async fn append(&self, record: Record) -> ItemHandle {
        debug!(id = %record.id, kind = %record.kind, "BatchAccumulator::append: called");
        let (waiter, rx) = oneshot::channel();
        match self.tx.send(BatchRequest::Append(BatchItem::new(record, waiter))).await {
            Ok(()) => ItemHandle::waiting(rx),
            Err(_) => {
                warn!("BatchAccumulator::append: accumulator closed");
                ItemHandle::ready(Err(BatchError::Closed))
            }
        }
    }

    /// Remove up to `max` of the oldest buffered items without delivering them
    pub async fn drain(&self, max: usize) -> Result<Vec<BatchItem>, BatchError> {
        debug!(max, "BatchAccumulator::drain: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BatchRequest::Drain { max, reply })
            .await
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)
    }

    /// Deliver everything buffered and wait for all in-flight deliveries
    pub async fn flush(&self) -> Result<(), BatchError> {
        debug!("BatchAccumulator::flush: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BatchRequest::Flush { reply })
            .await
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)
    }

    /// Flush, then stop the accumulator task
    pub async fn shutdown(&self) -> Result<(), BatchError> {
        debug!("BatchAccumulator::shutdown: called");
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BatchRequest::Shutdown { reply })
            .await
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)
    }
}

/// Decrements the in-flight count even if the sink panics
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// One chunk handed to the delivery task
struct DeliveryJob {
    records: Vec<Record>,
    waiters: Vec<Vec<oneshot::Sender<Outcome>>>,
    _guard: InFlightGuard,
}

/// Deliver chunks one at a time, in the order they were drained
///
/// A panicking sink resolves the chunk's handles `Closed`.
async fn deliver_in_order(sink: Arc<dyn BatchSink>, mut queue: mpsc::UnboundedReceiver<DeliveryJob>) {
    while let Some(job) = queue.recv().await {
        let DeliveryJob {
            records,
            waiters,
            _guard,
        } = job;
        debug!(records = records.len(), "deliver_in_order: delivering chunk");

        let results = match AssertUnwindSafe(sink.deliver(records)).catch_unwind().await {
            Ok(results) => results,
            Err(_) => {
                warn!("Batch sink panicked, abandoning chunk");
                Vec::new()
            }
        };

        let mut results = results.into_iter();
        for item_waiters in waiters {
            let outcome = match results.next() {
                Some(Ok(())) => Ok(Delivery::Sent),
                Some(Err(error)) => Err(BatchError::Delivery(error)),
                None => Err(BatchError::Closed),
            };
            resolve_all(item_waiters, outcome);
        }
    }
    debug!("deliver_in_order: queue closed");
}

/// State owned by the accumulator task
struct Accumulator {
    timing: Timing,
    max_batch_items: usize,
    deliveries: mpsc::UnboundedSender<DeliveryJob>,
    rx: mpsc::Receiver<BatchRequest>,
    buffer: VecDeque<BatchItem>,
    state: FlushState,
    deadline: Option<Instant>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Accumulator {
    async fn run(mut self) {
        info!("Batch accumulator started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if !self.handle(request) {
                            break;
                        }
                    }
                    None => {
                        debug!("Accumulator::run: all handles dropped");
                        self.apply(FlushEvent::Flush);
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.apply(FlushEvent::TimerFired { now: Instant::now() });
                }
            }
        }

        info!("Batch accumulator stopped");
    }

    /// Returns false once the accumulator should stop
    fn handle(&mut self, request: BatchRequest) -> bool {
        match request {
            BatchRequest::Append(item) => {
                self.buffer.push_back(item);
                self.apply(FlushEvent::Append {
                    now: Instant::now(),
                    len: self.buffer.len(),
                });
            }
            BatchRequest::Drain { max, reply } => {
                let items = self.take(max);
                debug!(taken = items.len(), remaining = self.buffer.len(), "Accumulator::handle: explicit drain");
                self.apply(FlushEvent::Taken {
                    remaining: self.buffer.len(),
                });
                // Caller gone: the items drop and their handles resolve Closed
                let _ = reply.send(items);
            }
            BatchRequest::Flush { reply } => {
                self.apply(FlushEvent::Flush);
                self.reply_when_settled(reply);
            }
            BatchRequest::Shutdown { reply } => {
                self.rx.close();
                self.apply(FlushEvent::Flush);
                self.reply_when_settled(reply);
                return false;
            }
        }
        true
    }

    /// Feed `event` through the state machine and carry out its actions
    fn apply(&mut self, event: FlushEvent) {
        let mut event = event;
        loop {
            let (next, action) = transition(self.state, event, &self.timing);
            self.state = next;
            match action {
                FlushAction::None => return,
                FlushAction::Arm(deadline) => {
                    self.deadline = Some(deadline);
                    return;
                }
                FlushAction::Disarm => {
                    self.deadline = None;
                    return;
                }
                FlushAction::DrainNow => {
                    self.deadline = None;
                    let batch = self.take(self.buffer.len());
                    self.dispatch(batch);
                    event = FlushEvent::Drained {
                        remaining: self.buffer.len(),
                    };
                }
            }
        }
    }

    fn take(&mut self, max: usize) -> Vec<BatchItem> {
        let count = max.min(self.buffer.len());
        self.buffer.drain(..count).collect()
    }

    /// Merge the drained items, then queue them in `max_batch_items` chunks
    fn dispatch(&self, batch: Vec<BatchItem>) {
        if batch.is_empty() {
            return;
        }

        let mut merged = merge_pairs(batch).into_iter().peekable();
        while merged.peek().is_some() {
            let (records, waiters): (Vec<_>, Vec<_>) = merged
                .by_ref()
                .take(self.max_batch_items)
                .map(BatchItem::into_parts)
                .unzip();
            debug!(records = records.len(), "Accumulator::dispatch: queueing chunk");

            self.in_flight.send_modify(|n| *n += 1);
            let job = DeliveryJob {
                records,
                waiters,
                _guard: InFlightGuard(Arc::clone(&self.in_flight)),
            };
            if self.deliveries.send(job).is_err() {
                warn!("Accumulator::dispatch: delivery task gone, abandoning chunk");
            }
        }
    }

    /// Reply once no delivery is in flight
    fn reply_when_settled(&self, reply: oneshot::Sender<()>) {
        let mut in_flight = self.in_flight.subscribe();
        tokio::spawn(async move {
            // Sender lives as long as any delivery guard, so an error means all settled
            let _ = in_flight.wait_for(|n| *n == 0).await;
            let _ = reply.send(());
        });
    }
}
