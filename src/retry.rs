use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff configuration with jitter to prevent thundering herd
/// when several workers hit the same transient failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry + random_jitter(0..base_delay), max_delay)`
    ///
    /// The jitter is added before the cap so the result never exceeds
    /// `max_delay`, and successive retries never get shorter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let jitter_ms = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };
        Duration::from_millis(exp_ms.saturating_add(jitter_ms)).min(self.max_delay)
    }
}

/// Explicit backoff state machine: attempt count, next delay, cap.
///
/// Each call to [`Backoff::next_delay`] advances the attempt counter and
/// returns how long to wait before the next try, or `None` once
/// `max_retries` retries have been handed out.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Number of retries handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let delay = self.config.delay_for_retry(self.attempt).max(self.last);
        self.attempt += 1;
        self.last = delay;
        Some(delay)
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// - `config`: retry configuration
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error if retries are exhausted
/// or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut backoff = Backoff::new(*config);

    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort {
                    return Err(e);
                }
                let Some(delay) = backoff.next_delay() else {
                    return Err(e);
                };
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}ms: {}",
                    backoff.attempts(),
                    total_attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
