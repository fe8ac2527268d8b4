//! Adaptive batching of records ahead of transmission
//!
//! The accumulator is a single task fed over a channel. It buffers appended
//! records, flushes on a debounce timer or when the buffer reaches its
//! high-water mark, merges create/update pairs for the same id and hands
//! each batch to a [`BatchSink`]. It never retries; that is the sink's job.

mod accumulator;
mod config;
mod item;
mod state;

pub use accumulator::{BatchAccumulator, BatchSink};
pub use config::BatchConfig;
pub use item::{BatchError, BatchItem, Delivery, ItemHandle, Outcome, merge_pairs};
pub use state::{FlushAction, FlushEvent, FlushState, Timing, transition};
