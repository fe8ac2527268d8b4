//! Transmission of record batches to the ingestion endpoint
//!
//! The gateway probes the endpoint once, splits batches into byte-budgeted
//! bodies and pushes each transfer through a [`crate::retry::RetryController`].
//! A 429 response delays the next attempt by its `retry-after`. When the
//! endpoint has no batch support, records are sent one at a time.

mod client;
mod config;
mod core;
mod error;
mod payload;

pub use client::{Capability, HttpIngestClient, IngestClient};
pub use config::{DEFAULT_SIZE_LIMIT_BYTES, GatewayConfig};
pub use core::IngestionGateway;
pub use error::IngestError;
pub use payload::{BatchPayload, ChunkPlan, plan_chunks};
