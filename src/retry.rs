//! Retry configuration, delay calculation, and the retry executor.
//!
//! [`RetryExecutor`] runs an async operation until it succeeds, fails with a
//! non-retryable error, or exhausts [`RetryConfig::max_attempts`]. The
//! retry verdict comes from the error's classification
//! ([`ImagegateError::is_retryable`]); the executor never re-classifies.
//!
//! Backoff is exponential with up to 10% positive jitter and capped at
//! [`RetryConfig::max_delay`]. A `retry_after` hint on the error replaces
//! the computed backoff (still capped).
//!
//! Cancellation is cooperative: once the token passed to
//! [`RetryExecutor::run`] fires, the in-flight attempt or pending sleep is
//! dropped and the call returns [`ImagegateError::Cancelled`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{ImagegateError, Result};

/// Upper bound of the multiplicative jitter applied to each delay.
const MAX_JITTER: f64 = 0.1;

/// Configuration for retry behaviour on retryable errors.
///
/// ```rust
/// # use imagegate::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial one).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to add up to 10% random jitter to delays. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial one).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before retry number `retry` (0 = first retry), without jitter.
    ///
    /// `initial_delay * 2^retry`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry));
        delay.min(self.max_delay)
    }

    /// Full delay before retry number `retry`: hint or backoff, plus jitter,
    /// capped at `max_delay`.
    pub fn effective_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let base = retry_after
            .unwrap_or_else(|| self.delay_for_attempt(retry))
            .min(self.max_delay);
        let delay = if self.jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..=MAX_JITTER);
            base.mul_f64(factor)
        } else {
            base
        };
        delay.min(self.max_delay)
    }
}

/// Where a failed attempt sits in the retry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub operation: &'static str,
    /// 1-based attempt number that just failed.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Whether the executor will try again.
    pub will_retry: bool,
}

type RetryFn = Arc<dyn Fn(u32, u32) + Send + Sync>;
type SuccessFn<T> = Arc<dyn Fn(&T, u32) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ImagegateError, &RetryContext) + Send + Sync>;

/// Observers fired at retry transitions.
///
/// - `on_retry(next_attempt, max_attempts)` before each backoff sleep
/// - `on_success(&value, attempts)` when an attempt succeeds
/// - `on_error(&error, &context)` after every failed attempt; check
///   [`RetryContext::will_retry`] to tell transient failures from the final one
///
/// Cancellation fires no hook.
pub struct RetryHooks<T> {
    on_retry: Option<RetryFn>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
}

impl<T> RetryHooks<T> {
    pub fn new() -> Self {
        Self {
            on_retry: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_retry(mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&T, u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&ImagegateError, &RetryContext) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl<T> Default for RetryHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RetryHooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_retry: self.on_retry.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for RetryHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHooks")
            .field("on_retry", &self.on_retry.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Runs an operation with classification-driven retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor<T> {
    config: RetryConfig,
    hooks: RetryHooks<T>,
    operation: &'static str,
}

impl<T> RetryExecutor<T> {
    /// Create an executor; `operation` labels logs and metrics.
    pub fn new(operation: &'static str, config: RetryConfig) -> Self {
        Self {
            config,
            hooks: RetryHooks::new(),
            operation,
        }
    }

    /// Attach transition hooks.
    pub fn with_hooks(mut self, hooks: RetryHooks<T>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The operation is invoked at most `max_attempts` times, and exactly
    /// once when its first failure is not retryable. The last error is
    /// returned on exhaustion.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ImagegateError::Cancelled),
                result = f() => result,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = self.operation, attempt, "succeeded after retry");
                    }
                    if let Some(hook) = &self.hooks.on_success {
                        hook(&value, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            let context = RetryContext {
                operation: self.operation,
                attempt,
                max_attempts,
                will_retry: error.is_retryable() && attempt < max_attempts,
            };
            if let Some(hook) = &self.hooks.on_error {
                hook(&error, &context);
            }
            if !context.will_retry {
                return Err(error);
            }

            let delay = self.config.effective_delay(attempt - 1, error.retry_after());
            let category = error.category().map_or("unknown", |c| c.as_str());
            metrics::counter!(telemetry::RETRIES_TOTAL,
                "operation" => self.operation,
                "category" => category,
            )
            .increment(1);
            warn!(
                operation = self.operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after retryable error"
            );
            if let Some(hook) = &self.hooks.on_retry {
                hook(attempt + 1, max_attempts);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ImagegateError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
