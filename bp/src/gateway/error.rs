//! Ingestion error types

use std::time::Duration;
use thiserror::Error;

use crate::retry::{RetryError, Retryable, Verdict};

/// Client errors that will fail the same way on every attempt
const NON_RETRYABLE_STATUSES: [u16; 8] = [400, 401, 403, 404, 405, 406, 407, 408];

/// Errors that can occur while transmitting records
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{message} (after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        message: String,
        #[source]
        last: Box<IngestError>,
    },
}

impl From<RetryError<IngestError>> for IngestError {
    fn from(error: RetryError<IngestError>) -> Self {
        match error {
            RetryError::Aborted(error) => error,
            RetryError::Exhausted {
                attempts,
                message,
                last,
            } => Self::Exhausted {
                attempts,
                message,
                last: Box::new(last),
            },
            RetryError::Cancelled => Self::Aborted("retry sequence cancelled".to_string()),
        }
    }
}

impl IngestError {
    /// Map a non-success HTTP status and its body to an error
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            409 => Self::Conflict { message },
            429 => Self::RateLimited { retry_after },
            s if NON_RETRYABLE_STATUSES.contains(&s) => Self::Client { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::UnexpectedStatus { status, message },
        }
    }

    /// HTTP status behind this error, if it came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } | Self::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            Self::Conflict { .. } => Some(409),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// How the retry controller should treat this failure
    pub fn classify(&self) -> Verdict {
        match self {
            Self::Network(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Server { .. }
            | Self::UnexpectedStatus { .. } => Verdict::Retry,
            Self::Conflict { .. } => Verdict::Ignore,
            Self::Aborted(_)
            | Self::Client { .. }
            | Self::MalformedResponse(_)
            | Self::Json(_)
            | Self::PayloadTooLarge { .. }
            | Self::Exhausted { .. } => Verdict::Abort,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classify() == Verdict::Retry
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Retryable for IngestError {
    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}
