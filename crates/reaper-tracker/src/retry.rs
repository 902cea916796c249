//! Bounded retry with exponential backoff and jitter.
//!
//! [`attempt`] runs an operation until it succeeds, fails terminally, or the
//! attempt budget is spent. Delays come from `backon::ExponentialBuilder`;
//! sleeping goes through `tokio::time`, so tests drive it with a paused clock.

use crate::error::AdapterError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff policy for delete retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    /// Add random jitter in `[0, delay)` to each backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: reaper_common::defaults::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(reaper_common::defaults::DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(reaper_common::defaults::DEFAULT_MAX_DELAY_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff delays between attempts (`max_attempts - 1` of them)
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder = builder.with_jitter();
        }
        builder.build()
    }

    /// Worst-case total sleep across all retries (jitter at most doubles a delay)
    pub fn max_total_delay(&self) -> Duration {
        let factor = if self.jitter { 2 } else { 1 };
        let mut delay = self.base_delay;
        let mut total = Duration::ZERO;
        for _ in 1..self.max_attempts {
            total += delay.min(self.max_delay) * factor;
            delay = delay.saturating_mul(2);
        }
        total
    }
}

/// Final result of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, AdapterError>,
    /// Calls made to the operation
    pub attempts: u32,
}

/// Run `op` under `policy`.
///
/// Only errors with [`AdapterError::is_retryable`] are retried. If `interrupt`
/// fires, pending backoff sleeps are skipped but the attempt budget still
/// applies.
pub async fn attempt<T, F, Fut>(
    policy: &RetryPolicy,
    interrupt: Option<&CancellationToken>,
    label: &str,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = policy.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let result = op().await;

        let err = match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(e) => e,
        };

        if !err.is_retryable() || attempts >= max_attempts {
            return Attempted {
                result: Err(err),
                attempts,
            };
        }

        let delay = delays.next().unwrap_or(policy.max_delay);
        debug!(
            operation = %label,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            error = %err,
            "Transient failure, retrying"
        );

        match interrupt {
            Some(token) if token.is_cancelled() => {}
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}
