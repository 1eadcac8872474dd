//! Bounded retry with backoff
//!
//! Wraps any async operation. The predicate decides which errors are worth
//! another attempt; everything else is returned on the first failure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::PulsechainError;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry configuration for one call to [`retry`]
pub struct RetryOptions<E> {
    /// Retries after the first attempt; 0 means a single attempt
    pub max_retries: u32,
    /// Base delay between attempts
    pub retry_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential_backoff: bool,
    retry_condition: RetryPredicate<E>,
}

impl<E> RetryOptions<E> {
    pub fn new(max_retries: u32, retry_delay: Duration, exponential_backoff: bool) -> Self {
        Self {
            max_retries,
            retry_delay,
            exponential_backoff,
            retry_condition: Arc::new(|_| true),
        }
    }

    /// Only retry errors for which `condition` returns true
    pub fn retry_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.retry_condition)(error)
    }

    /// Delay to wait after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.exponential_backoff {
            let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.retry_delay.saturating_mul(factor)
        } else {
            self.retry_delay
        }
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, true)
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            exponential_backoff: self.exponential_backoff,
            retry_condition: Arc::clone(&self.retry_condition),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .finish_non_exhaustive()
    }
}

/// Run `operation` until it succeeds, the predicate rejects the error, or the
/// retry budget is spent. The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(mut operation: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !options.should_retry(&e) || attempt >= options.max_retries {
                    return Err(e);
                }

                let delay = options.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry condition for transport failures and 5xx responses
pub fn is_network_error(error: &PulsechainError) -> bool {
    error.is_network_error()
}

/// Retry condition for request execution: network errors, 5xx and 429
pub fn is_retryable(error: &PulsechainError) -> bool {
    error.is_retryable()
}
