//! IngestionGateway implementation

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::client::{Capability, HttpIngestClient, IngestClient};
use super::config::GatewayConfig;
use super::error::IngestError;
use super::payload::plan_chunks;
use crate::batch::BatchSink;
use crate::domain::{Priority, Record};
use crate::retry::{AttemptContext, CallOptions, Directive, RetryConfig, RetryController};
use crate::scheduler::PriorityScheduler;

type DeliveryResult = Result<(), Arc<IngestError>>;

/// Transmits records to the ingestion endpoint with retry and backpressure
///
/// The first delivery probes the endpoint once; the answer is kept for the
/// gateway's lifetime. Batches go to the batch endpoint in byte-budgeted
/// bodies, otherwise every record is sent on its own.
pub struct IngestionGateway {
    client: Arc<dyn IngestClient>,
    retry: RetryController<IngestError>,
    scheduler: Option<PriorityScheduler>,
    priority: Priority,
    size_limit: usize,
    capability: OnceCell<Capability>,
}

impl IngestionGateway {
    /// Create a gateway over `client`
    pub fn new(client: Arc<dyn IngestClient>, retry: RetryConfig, size_limit: usize) -> Self {
        debug!(size_limit, "IngestionGateway::new: called");
        let retry = RetryController::new(retry, IngestError::classify).with_before_retry(|error, attempt| {
            match error.retry_after() {
                Some(delay) => {
                    warn!(attempt, ?delay, "Rate limited, waiting for retry-after");
                    Directive::Delay(delay)
                }
                None => Directive::Backoff,
            }
        });

        Self {
            client,
            retry,
            scheduler: None,
            priority: Priority::NORMAL,
            size_limit,
            capability: OnceCell::new(),
        }
    }

    /// Create a gateway talking HTTP to the configured endpoint
    pub fn from_config(config: &GatewayConfig, retry: RetryConfig) -> Result<Self, IngestError> {
        let client = HttpIngestClient::from_config(config)?;
        Ok(Self::new(Arc::new(client), retry, config.size_limit_bytes))
    }

    /// Run every attempt as a task on `scheduler` at `priority`
    pub fn with_scheduler(mut self, scheduler: PriorityScheduler, priority: Priority) -> Self {
        debug!(%priority, "IngestionGateway::with_scheduler: called");
        self.scheduler = Some(scheduler);
        self.priority = priority;
        self
    }

    /// Endpoint capability, probing on first use
    ///
    /// A failed probe is remembered as "batch unsupported".
    pub async fn capability(&self) -> Capability {
        *self
            .capability
            .get_or_init(|| async {
                match self.client.probe().await {
                    Ok(capability) => {
                        info!(?capability, "Batch endpoint probed");
                        capability
                    }
                    Err(e) => {
                        warn!(error = %e, "Batch endpoint unavailable, sending records individually");
                        Capability::unsupported()
                    }
                }
            })
            .await
    }

    /// Byte budget for one batch body under `capability`
    pub fn byte_budget(&self, capability: &Capability) -> usize {
        match capability.size_limit {
            Some(limit) => limit.min(self.size_limit),
            None => self.size_limit,
        }
    }

    /// Send `records`, returning one result per record in the order given
    pub async fn send_records(&self, records: Vec<Record>) -> Vec<DeliveryResult> {
        debug!(records = records.len(), "IngestionGateway::send_records: called");
        if records.is_empty() {
            return Vec::new();
        }

        let capability = self.capability().await;
        if capability.batch {
            self.send_batched(&records, self.byte_budget(&capability)).await
        } else {
            self.send_individually(&records).await
        }
    }

    /// Per-record fallback: every create settles before any update is sent
    async fn send_individually(&self, records: &[Record]) -> Vec<DeliveryResult> {
        let mut results: Vec<DeliveryResult> = vec![Ok(()); records.len()];
        for creates in [true, false] {
            let phase = records
                .iter()
                .enumerate()
                .filter(|(_, record)| record.is_create() == creates)
                .map(|(index, record)| async move { (index, self.send_record(record).await) });
            for (index, outcome) in join_all(phase).await {
                results[index] = outcome.map_err(Arc::new);
            }
        }
        results
    }

    async fn send_batched(&self, records: &[Record], budget: usize) -> Vec<DeliveryResult> {
        let plan = match plan_chunks(records, budget) {
            Ok(plan) => plan,
            Err(e) => {
                let error = Arc::new(e);
                return records.iter().map(|_| Err(Arc::clone(&error))).collect();
            }
        };

        let mut results: Vec<DeliveryResult> = vec![Ok(()); records.len()];
        for (index, error) in plan.rejected {
            warn!(id = %records[index].id, %error, "Record exceeds batch size limit, dropping");
            results[index] = Err(Arc::new(error));
        }

        // One body at a time so each kind reaches the endpoint in order
        for payload in plan.payloads {
            let members = payload.members().to_vec();
            debug!(
                creates = payload.creates(),
                updates = payload.updates(),
                bytes = payload.encoded_len(),
                "IngestionGateway::send_batched: sending body"
            );
            if let Err(e) = self.send_body(payload.into_body()).await {
                let error = Arc::new(e);
                for index in members {
                    results[index] = Err(Arc::clone(&error));
                }
            }
        }
        results
    }

    /// POST one batch body with retry
    pub async fn send_body(&self, body: String) -> Result<(), IngestError> {
        let outcome = self
            .retry
            .call_with_context(
                |ctx| {
                    let client = Arc::clone(&self.client);
                    let body = body.clone();
                    self.attempt(ctx, move || async move { client.send_batch(body).await })
                },
                CallOptions::new(),
            )
            .await;
        outcome.map(|_| ()).map_err(IngestError::from)
    }

    /// Send one record to the per-record endpoint with retry
    pub async fn send_record(&self, record: &Record) -> Result<(), IngestError> {
        let outcome = self
            .retry
            .call_with_context(
                |ctx| {
                    let client = Arc::clone(&self.client);
                    let record = record.clone();
                    self.attempt(ctx, move || async move {
                        if record.is_create() {
                            client.create(&record).await
                        } else {
                            client.update(&record).await
                        }
                    })
                },
                CallOptions::new(),
            )
            .await;
        outcome.map(|_| ()).map_err(IngestError::from)
    }

    /// Run one attempt, through the scheduler when one is attached
    ///
    /// The job stops transmitting once the attempt's token is cancelled, so a
    /// timed-out attempt that is still queued or running on the scheduler
    /// never sends a second copy.
    async fn attempt<F, Fut>(&self, ctx: AttemptContext, job: F) -> Result<(), IngestError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), IngestError>> + Send + 'static,
    {
        let cancel = ctx.cancel;
        let attempt = ctx.attempt;
        let guarded = move || async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt, "IngestionGateway::attempt: cancelled before completion");
                    Err(IngestError::Aborted(format!("attempt {attempt} cancelled")))
                }
                result = job() => result,
            }
        };

        match &self.scheduler {
            Some(scheduler) => scheduler
                .submit(self.priority, guarded)
                .await
                .await
                .map_err(|e| IngestError::Aborted(e.to_string()))?,
            None => guarded().await,
        }
    }
}

#[async_trait]
impl BatchSink for IngestionGateway {
    async fn deliver(&self, records: Vec<Record>) -> Vec<DeliveryResult> {
        self.send_records(records).await
    }
}
