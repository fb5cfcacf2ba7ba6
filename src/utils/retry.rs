//! Retry utilities with exponential backoff for provider calls.
//!
//! A call is retried only on transient failures (timeouts, HTTP 429, HTTP
//! 5xx, connection errors). The delay before attempt `n + 1` is
//! `initial_delay * multiplier^n` scaled by a random jitter factor and capped
//! at `max_delay`, unless the failure carried a server `Retry-After` hint,
//! which is used as-is.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::sources::SourceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub initial_delay: Duration,
    /// Maximum computed delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter factor range applied to the computed delay
    pub jitter: (f64, f64),
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: (0.5, 1.5),
        }
    }
}

impl RetryConfig {
    /// Computed backoff after the attempt with 0-based index `failed_attempt`
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(failed_attempt.min(30) as i32);
        let (low, high) = self.jitter;
        let factor = if low < high {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        let secs = (exp * factor).min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// Delay before the next attempt; a server hint overrides the backoff
    pub fn delay_for(&self, failed_attempt: u32, error: &SourceError) -> Duration {
        error
            .retry_after()
            .unwrap_or_else(|| self.backoff(failed_attempt))
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded on the given attempt
    Success(T, u32),
    /// Operation kept failing transiently until the attempt budget ran out
    TransientFailure(SourceError, u32),
    /// Operation failed with an error that is not worth retrying
    PermanentFailure(SourceError, u32),
}

impl<T> RetryResult<T> {
    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success(_, n)
            | RetryResult::TransientFailure(_, n)
            | RetryResult::PermanentFailure(_, n) => *n,
        }
    }

    pub fn into_result(self) -> Result<T, SourceError> {
        match self {
            RetryResult::Success(value, _) => Ok(value),
            RetryResult::TransientFailure(err, _) | RetryResult::PermanentFailure(err, _) => {
                Err(err)
            }
        }
    }
}

/// Loop state between attempts
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
    last_error: Option<SourceError>,
}

/// Execute an async operation with retry logic.
///
/// The operation receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut state = RetryState::default();

    loop {
        if let Some(error) = &state.last_error {
            tracing::debug!(
                attempt = state.attempt,
                delay_ms = state.next_delay.as_millis() as u64,
                "Transient error, retrying: {}",
                error
            );
            sleep(state.next_delay).await;
        }

        state.attempt += 1;

        let error = match operation(state.attempt).await {
            Ok(value) => {
                if state.attempt > 1 {
                    tracing::debug!("Operation succeeded on attempt {}", state.attempt);
                }
                return RetryResult::Success(value, state.attempt);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return RetryResult::PermanentFailure(error, state.attempt);
        }

        if state.attempt >= max_attempts {
            tracing::warn!(
                "Operation failed after {} attempts: {}",
                state.attempt,
                error
            );
            return RetryResult::TransientFailure(error, state.attempt);
        }

        state.next_delay = config.delay_for(state.attempt - 1, &error);
        state.last_error = Some(error);
    }
}
