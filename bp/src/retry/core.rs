//! RetryController implementation

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backoff::backoff_delay;
use super::config::RetryConfig;
use super::error::{Directive, RetryError, Retryable, Verdict};

type Classifier<E> = Arc<dyn Fn(&E) -> Verdict + Send + Sync>;
type BeforeRetry<E> = Arc<dyn Fn(&E, u32) -> Directive + Send + Sync>;

/// Passed to each attempt of a [`RetryController::call_with_context`]
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number
    pub attempt: u32,

    /// Cancelled when this attempt times out or the caller cancels
    pub cancel: CancellationToken,
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Messages of every retried failure, in order
#[derive(Debug, Default, Clone)]
pub struct ErrorLog {
    messages: Vec<String>,
}

impl ErrorLog {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The message logged most often; ties go to the one seen first
    pub fn most_frequent(&self) -> Option<&str> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in &self.messages {
            *counts.entry(message.as_str()).or_default() += 1;
        }

        let mut best: Option<(&str, usize)> = None;
        for message in &self.messages {
            let count = counts[message.as_str()];
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((message.as_str(), count));
            }
        }
        best.map(|(message, _)| message)
    }
}

/// State of one `call`, discarded when it resolves
struct RetryAttempt {
    index: u32,
    errors: ErrorLog,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

/// Wraps an async operation with classified, bounded, backoff-based retry
pub struct RetryController<E> {
    config: RetryConfig,
    classify: Classifier<E>,
    before_retry: Option<BeforeRetry<E>>,
}

impl<E> Clone for RetryController<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classify: Arc::clone(&self.classify),
            before_retry: self.before_retry.clone(),
        }
    }
}

impl<E: Retryable> RetryController<E> {
    /// Create a controller with the given classifier
    pub fn new(config: RetryConfig, classify: impl Fn(&E) -> Verdict + Send + Sync + 'static) -> Self {
        debug!(?config, "RetryController::new: called");
        Self {
            config,
            classify: Arc::new(classify),
            before_retry: None,
        }
    }

    /// Install a hook consulted between a retryable failure and the next attempt
    pub fn with_before_retry(mut self, hook: impl Fn(&E, u32) -> Directive + Send + Sync + 'static) -> Self {
        self.before_retry = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or the retry budget is spent
    ///
    /// Returns `Ok(None)` when a failure was classified `Ignore`.
    pub async fn call<F, Fut, T>(&self, mut operation: F, options: CallOptions) -> Result<Option<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_context(move |_| operation(), options).await
    }

    /// Like [`call`](Self::call), handing each attempt its number and cancel token
    pub async fn call_with_context<F, Fut, T>(
        &self,
        mut operation: F,
        options: CallOptions,
    ) -> Result<Option<T>, RetryError<E>>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts).max(1);
        let cancel = options.cancel.unwrap_or_default();
        let mut state = RetryAttempt {
            index: 0,
            errors: ErrorLog::default(),
            timeout: options.timeout.or(self.config.attempt_timeout()),
            deadline: self.config.max_retry_time().map(|budget| Instant::now() + budget),
        };
        debug!(max_attempts, timeout = ?state.timeout, "RetryController::call: called");

        loop {
            state.index += 1;
            let attempt_token = cancel.child_token();
            let attempt = operation(AttemptContext {
                attempt: state.index,
                cancel: attempt_token.clone(),
            });

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt = state.index, "RetryController::call: cancelled during attempt");
                    return Err(RetryError::Cancelled);
                }
                result = run_attempt(attempt, state.timeout, &attempt_token) => result,
            };

            let error = match result {
                Ok(value) => {
                    debug!(attempt = state.index, "RetryController::call: success");
                    return Ok(Some(value));
                }
                Err(error) => error,
            };

            match (self.classify)(&error) {
                Verdict::Abort => {
                    debug!(attempt = state.index, %error, "RetryController::call: aborting");
                    return Err(RetryError::Aborted(error));
                }
                Verdict::Ignore => {
                    debug!(attempt = state.index, %error, "RetryController::call: ignoring as already applied");
                    return Ok(None);
                }
                Verdict::Retry => {}
            }

            state.errors.push(error.to_string());
            if state.index >= max_attempts {
                return Err(exhausted(state, error));
            }

            let directive = match &self.before_retry {
                Some(hook) => hook(&error, state.index),
                None => Directive::Backoff,
            };
            let delay = match directive {
                Directive::Abort => {
                    debug!(attempt = state.index, %error, "RetryController::call: hook aborted sequence");
                    return Err(RetryError::Aborted(error));
                }
                Directive::Delay(delay) => delay,
                Directive::Backoff => backoff_delay(&self.config, state.index - 1),
            };

            if let Some(deadline) = state.deadline
                && Instant::now() + delay >= deadline
            {
                debug!(attempt = state.index, ?delay, "RetryController::call: retry time budget spent");
                return Err(exhausted(state, error));
            }

            warn!(
                attempt = state.index,
                backoff_ms = delay.as_millis() as u64,
                %error,
                "RetryController::call: retrying after failure"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt = state.index, "RetryController::call: cancelled during backoff");
                    return Err(RetryError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Race one attempt against its timeout, cancelling its token on expiry
async fn run_attempt<Fut, T, E>(attempt: Fut, timeout: Option<Duration>, token: &CancellationToken) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let Some(limit) = timeout else {
        return attempt.await;
    };

    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => {
            debug!(?limit, "run_attempt: attempt timed out");
            token.cancel();
            Err(E::timed_out(limit))
        }
    }
}

fn exhausted<E: Retryable>(state: RetryAttempt, last: E) -> RetryError<E> {
    let message = state
        .errors
        .most_frequent()
        .map(str::to_string)
        .unwrap_or_else(|| last.to_string());
    warn!(attempts = state.index, %message, "Retries exhausted");
    RetryError::Exhausted {
        attempts: state.index,
        message,
        last,
    }
}
