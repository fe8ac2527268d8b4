//! Composition of sampling, batching and transmission

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::batch::{BatchAccumulator, BatchConfig, BatchError, Delivery, ItemHandle};
use crate::config::Config;
use crate::domain::Record;
use crate::gateway::IngestionGateway;
use crate::sampling::SamplingFilter;
use crate::scheduler::PriorityScheduler;

/// Records flow through sampling, then the batch buffer, then the gateway
pub struct Pipeline {
    sampling: SamplingFilter,
    accumulator: BatchAccumulator,
    gateway: Arc<IngestionGateway>,
}

impl Pipeline {
    /// Wire a pipeline around an existing gateway
    pub fn new(sampling: SamplingFilter, batching: BatchConfig, gateway: Arc<IngestionGateway>) -> Self {
        debug!(rate = ?sampling.rate(), "Pipeline::new: called");
        let accumulator = BatchAccumulator::spawn(batching, gateway.clone());
        Self {
            sampling,
            accumulator,
            gateway,
        }
    }

    /// Build the HTTP gateway and pipeline described by `config`
    ///
    /// When the gateway is configured to use the scheduler, each transmission
    /// attempt is submitted to `scheduler` at the configured priority.
    pub fn from_config(config: &Config, scheduler: PriorityScheduler) -> Result<Self> {
        let mut gateway = IngestionGateway::from_config(&config.gateway, config.retry.clone())
            .context("Failed to create ingestion gateway")?;
        if config.gateway.use_scheduler {
            gateway = gateway.with_scheduler(scheduler, config.scheduler.default_priority);
        }

        info!(base_url = %config.gateway.base_url, "Pipeline configured");
        Ok(Self::new(
            SamplingFilter::new(config.sampling.rate),
            config.batching.clone(),
            Arc::new(gateway),
        ))
    }

    /// Submit `record`; sampled-out records resolve immediately
    pub async fn append(&self, record: Record) -> ItemHandle {
        if !self.sampling.admit(&record) {
            return ItemHandle::ready(Ok(Delivery::SampledOut));
        }
        self.accumulator.append(record).await
    }

    /// Deliver everything buffered and wait for it to settle
    pub async fn flush(&self) -> Result<(), BatchError> {
        self.accumulator.flush().await
    }

    /// Flush and stop accepting records
    pub async fn shutdown(&self) -> Result<(), BatchError> {
        info!("Pipeline shutting down");
        self.accumulator.shutdown().await
    }

    pub fn gateway(&self) -> &IngestionGateway {
        &self.gateway
    }

    pub fn sampling(&self) -> &SamplingFilter {
        &self.sampling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Capability, IngestClient, IngestError};
    use crate::retry::RetryConfig;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingClient {
        bodies: Mutex<Vec<Value>>,
    }

    impl CollectingClient {
        fn posted_ids(&self) -> Vec<String> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .flat_map(|body| body["post"].as_array().cloned().unwrap_or_default())
                .map(|item| item["id"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        fn patched(&self) -> usize {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .map(|body| body["patch"].as_array().map_or(0, Vec::len))
                .sum()
        }
    }

    #[async_trait]
    impl IngestClient for CollectingClient {
        async fn probe(&self) -> Result<Capability, IngestError> {
            Ok(Capability {
                batch: true,
                size_limit: None,
            })
        }

        async fn send_batch(&self, body: String) -> Result<(), IngestError> {
            self.bodies.lock().unwrap().push(serde_json::from_str(&body).unwrap());
            Ok(())
        }

        async fn create(&self, _record: &Record) -> Result<(), IngestError> {
            Ok(())
        }

        async fn update(&self, _record: &Record) -> Result<(), IngestError> {
            Ok(())
        }
    }

    fn pipeline(rate: Option<f64>) -> (Pipeline, Arc<CollectingClient>) {
        let client = Arc::new(CollectingClient::default());
        let gateway = IngestionGateway::new(client.clone(), RetryConfig::default(), 1024 * 1024);
        let pipeline = Pipeline::new(SamplingFilter::new(rate), BatchConfig::default(), Arc::new(gateway));
        (pipeline, client)
    }

    async fn run_pairs(pipeline: &Pipeline, count: usize) -> Vec<Delivery> {
        let mut handles = Vec::new();
        for i in 0..count {
            handles.push(pipeline.append(Record::create(format!("r{i}"), json!({"n": i}))).await);
        }
        for i in 0..count {
            handles.push(pipeline.append(Record::update(format!("r{i}"), json!({"done": true}))).await);
        }
        pipeline.flush().await.unwrap();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_rate_zero_sends_nothing() {
        let (pipeline, client) = pipeline(Some(0.0));
        let outcomes = run_pairs(&pipeline, 5).await;

        assert!(outcomes.iter().all(|o| *o == Delivery::SampledOut));
        assert!(client.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_one_sends_everything_merged() {
        let (pipeline, client) = pipeline(Some(1.0));
        let outcomes = run_pairs(&pipeline, 5).await;

        assert!(outcomes.iter().all(|o| *o == Delivery::Sent));
        assert_eq!(client.posted_ids(), vec!["r0", "r1", "r2", "r3", "r4"]);
        assert_eq!(client.patched(), 0);
        let bodies = client.bodies.lock().unwrap();
        assert_eq!(bodies[0]["post"][0]["done"], true);
    }

    #[tokio::test]
    async fn test_unsampled_updates_never_sent() {
        let (pipeline, client) = pipeline(Some(1.0));
        let stray = pipeline.append(Record::update("never-created", json!({}))).await;
        pipeline.flush().await.unwrap();

        assert_eq!(stray.await.unwrap(), Delivery::SampledOut);
        assert!(client.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_then_append_is_closed() {
        let (pipeline, client) = pipeline(None);
        let handle = pipeline.append(Record::create("a", json!({}))).await;
        pipeline.shutdown().await.unwrap();

        assert_eq!(handle.await.unwrap(), Delivery::Sent);
        assert_eq!(client.posted_ids(), vec!["a"]);

        let late = pipeline.append(Record::create("b", json!({}))).await;
        assert!(matches!(late.await, Err(BatchError::Closed)));
    }
}
