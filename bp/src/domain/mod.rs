//! Domain types for batchpipe
//!
//! Priorities for scheduled work and the records that flow through
//! sampling, batching and ingestion.

mod priority;
mod record;

pub use priority::Priority;
pub use record::{Record, RecordKind};
