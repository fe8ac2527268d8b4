//! Classified, bounded retry with exponential backoff
//!
//! A [`RetryController`] wraps one asynchronous operation. Each failure is
//! classified as abort, ignore or retry; retries back off exponentially
//! until the attempt count or the time budget runs out.

mod backoff;
mod config;
mod core;
mod error;

pub use backoff::{backoff_delay, scaled_delay};
pub use config::RetryConfig;
pub use core::{AttemptContext, CallOptions, ErrorLog, RetryController};
pub use error::{Directive, RetryError, Retryable, Verdict};
