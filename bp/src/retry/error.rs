//! Retry outcomes and classification types

use std::time::Duration;
use thiserror::Error;

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Stop now and surface the error
    Abort,

    /// Stop now and resolve successfully; the work was already applied
    Ignore,

    /// Record the error and try again if the budget allows
    Retry,
}

/// Instruction from the before-retry hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Sleep the configured backoff delay
    Backoff,

    /// Sleep exactly this long instead of the backoff delay
    Delay(Duration),

    /// Abandon the whole sequence with the current error
    Abort,
}

/// Errors a retried operation can produce
pub trait Retryable: std::error::Error + Send + Sync + Sized + 'static {
    /// The error reported when an attempt exceeds its timeout
    fn timed_out(after: Duration) -> Self;
}

/// Why a retried call failed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error(transparent)]
    Aborted(E),

    /// Budget spent; `message` is the most frequent error seen
    #[error("{message} (after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        message: String,
        #[source]
        last: E,
    },

    #[error("Retry sequence cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying operation error, if there was one
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Aborted(error) => Some(error),
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
