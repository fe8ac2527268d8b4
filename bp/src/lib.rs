//! batchpipe - Scheduled, Retried, Batched Record Ingestion
//!
//! batchpipe submits units of work reliably: under a concurrency and rate
//! limit, with classified retries, and in size-bounded batches.
//!
//! # Core Concepts
//!
//! - **Priority scheduling**: work runs highest priority first, FIFO within a level
//! - **Classified retry**: each failure aborts, is ignored or is retried with backoff
//! - **Adaptive batching**: records are debounced into batches and create/update pairs merged
//! - **Backpressure**: a 429 `retry-after` delays the next attempt
//!
//! # Modules
//!
//! - [`scheduler`] - Priority scheduler with concurrency and interval caps
//! - [`retry`] - Retry controller with backoff and before-retry hook
//! - [`sampling`] - Probabilistic record sampling
//! - [`batch`] - Batch accumulator actor and flush state machine
//! - [`gateway`] - HTTP transmission to the ingestion endpoint
//! - [`pipeline`] - Sampling, batching and transmission wired together
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod pipeline;
pub mod retry;
pub mod sampling;
pub mod scheduler;

// Re-export commonly used types
pub use batch::{BatchAccumulator, BatchConfig, BatchError, BatchSink, Delivery, ItemHandle};
pub use config::Config;
pub use domain::{Priority, Record, RecordKind};
pub use gateway::{GatewayConfig, HttpIngestClient, IngestClient, IngestError, IngestionGateway};
pub use pipeline::Pipeline;
pub use retry::{CallOptions, Directive, RetryConfig, RetryController, RetryError, Retryable, Verdict};
pub use sampling::SamplingFilter;
pub use scheduler::{PriorityScheduler, SchedulerConfig, SchedulerError, SchedulerEvent, TaskHandle};
