//! Global pacing for remote API calls.
//!
//! A single [`RateLimiter`] is shared by the index builder and every
//! download worker. It enforces a minimum spacing between consecutive
//! calls regardless of which task issues them, and when the server
//! signals throttling it blocks *all* callers for an escalating,
//! jittered backoff until a call succeeds again.

use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::catalog::CatalogError;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("throttled {throttles} times in a row (limit {max_retries})")]
    Exhausted { throttles: u32, max_retries: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Minimum spacing between two consecutive remote calls.
    pub min_interval: Duration,
    /// Escalation used on throttling: `max_retries` is the number of
    /// consecutive throttles tolerated before giving up.
    pub backoff: RetryConfig,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1100),
            backoff: RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
            },
        }
    }
}

/// Throttle bookkeeping. Never held across an await point.
#[derive(Debug, Default)]
struct RateBudget {
    consecutive_throttles: u32,
    current_backoff: Duration,
    blocked_until: Option<Instant>,
}

pub struct RateLimiter {
    config: ThrottleConfig,
    /// Timestamp of the most recent call. Held for the whole wait inside
    /// `acquire()` so check-and-record is one critical section.
    last_call: Mutex<Option<Instant>>,
    budget: StdMutex<RateBudget>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_call: Mutex::new(None),
            budget: StdMutex::new(RateBudget::default()),
        }
    }

    fn budget(&self) -> std::sync::MutexGuard<'_, RateBudget> {
        // A panic while holding the budget lock leaves plain counters behind,
        // which are still usable.
        self.budget
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Wait until the next remote call is allowed, then record it.
    ///
    /// Callers queue on the inner mutex in FIFO order, so spacing holds
    /// across all workers rather than per worker.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        loop {
            let now = Instant::now();
            let mut ready_at = now;
            if let Some(last) = *last_call {
                ready_at = ready_at.max(last + self.config.min_interval);
            }
            if let Some(until) = self.budget().blocked_until {
                ready_at = ready_at.max(until);
            }
            if ready_at <= now {
                break;
            }
            // Re-check afterwards: a throttle may have pushed blocked_until
            // further out while we slept.
            tokio::time::sleep_until(ready_at).await;
        }
        *last_call = Some(Instant::now());
    }

    /// Record a throttling response and return the delay every caller must
    /// now observe. Fails once more than `max_retries` throttles arrive in
    /// a row.
    pub fn on_throttle(&self, retry_after: Option<Duration>) -> Result<Duration, RateLimitError> {
        let backoff = &self.config.backoff;
        let mut budget = self.budget();
        budget.consecutive_throttles += 1;
        let throttles = budget.consecutive_throttles;

        if throttles > backoff.max_retries {
            budget.consecutive_throttles = 0;
            budget.current_backoff = Duration::ZERO;
            return Err(RateLimitError::Exhausted {
                throttles,
                max_retries: backoff.max_retries,
            });
        }

        let computed = backoff.delay_for_retry(throttles - 1);
        let delay = retry_after.unwrap_or(computed).max(budget.current_backoff);
        budget.current_backoff = delay;

        let until = Instant::now() + delay;
        budget.blocked_until = Some(budget.blocked_until.map_or(until, |b| b.max(until)));
        Ok(delay)
    }

    pub fn on_success(&self) {
        let mut budget = self.budget();
        budget.consecutive_throttles = 0;
        budget.current_backoff = Duration::ZERO;
    }

    #[cfg(test)]
    pub fn consecutive_throttles(&self) -> u32 {
        self.budget().consecutive_throttles
    }

    /// Run one remote call under the limiter: acquire, call, and on a
    /// throttling response escalate and try again. Any other error is
    /// returned unchanged.
    pub async fn call<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        loop {
            self.acquire().await;
            match op().await {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(e) if e.is_throttle() => {
                    let delay = self.on_throttle(e.retry_after()).map_err(|source| {
                        tracing::warn!(context, error = %source, "Giving up after repeated throttling");
                        CatalogError::RateLimited {
                            context: context.to_string(),
                            source,
                        }
                    })?;
                    tracing::warn!(
                        context,
                        delay_ms = delay.as_millis() as u64,
                        hinted = e.retry_after().is_some(),
                        "Throttled by server, backing off"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a `Retry-After` header value.
///
/// Accepts either an integer number of seconds (`"30"`) or an HTTP-date
/// (`"Fri, 31 Dec 2027 23:59:59 GMT"`), which is turned into a delay from
/// now. Dates in the past or more than an hour out are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let diff = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    let secs: u64 = diff.num_seconds().try_into().ok()?;
    if secs == 0 || secs > 3600 {
        tracing::debug!(value, "Ignoring out-of-range Retry-After date");
        return None;
    }
    Some(Duration::from_secs(secs))
}
