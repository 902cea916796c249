//! State waiting with exponential backoff and interruption support.
//!
//! Before deleting, the orchestrator waits for a resource to reach a state in
//! which the provider will accept the delete (not mid-update, not still
//! creating). The wait is bounded and can be abandoned early when an
//! emergency sweep needs to move on.

use crate::adapter::{DeletionAdapter, Described};
use crate::error::AdapterError;
use backon::{BackoffBuilder, ExponentialBuilder};
use reaper_common::defaults::{
    DEFAULT_STATE_POLL_INITIAL_MS, DEFAULT_STATE_POLL_MAX_MS, DEFAULT_STATE_WAIT_TIMEOUT_SECS,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for state waiting with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_STATE_POLL_INITIAL_MS),
            max_delay: Duration::from_millis(DEFAULT_STATE_POLL_MAX_MS),
            timeout: Duration::from_secs(DEFAULT_STATE_WAIT_TIMEOUT_SECS),
        }
    }
}

/// What a single readiness check observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    Gone,
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Resource can be deleted now
    Ready,
    /// Resource no longer exists
    Gone,
    /// Budget elapsed without the resource becoming ready
    TimedOut,
    /// Interrupt fired; caller should proceed without waiting
    Interrupted,
    /// Check failed with a non-retryable error
    Failed(AdapterError),
}

/// Poll `check` until it reports ready/gone, the timeout elapses, or
/// `interrupt` fires.
///
/// Retryable check errors are treated as "not ready yet"; anything else ends
/// the wait with [`WaitOutcome::Failed`].
pub async fn wait_for_state<F, Fut>(
    config: &WaitConfig,
    interrupt: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> WaitOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Readiness, AdapterError>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    loop {
        attempts += 1;

        // Check interruption before each attempt
        if interrupt.is_some_and(CancellationToken::is_cancelled) {
            debug!(resource = %resource_name, "State wait interrupted");
            return WaitOutcome::Interrupted;
        }

        match check().await {
            Ok(Readiness::Ready) => {
                debug!(resource = %resource_name, attempts, "Resource ready for deletion");
                return WaitOutcome::Ready;
            }
            Ok(Readiness::Gone) => return WaitOutcome::Gone,
            Ok(Readiness::Pending) => {}
            Err(e) if e.is_not_found() => return WaitOutcome::Gone,
            Err(e) if e.is_retryable() => {
                debug!(resource = %resource_name, error = %e, "Transient state check failure");
            }
            Err(e) => {
                warn!(resource = %resource_name, error = %e, "State check failed");
                return WaitOutcome::Failed(e);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            warn!(
                resource = %resource_name,
                timeout_ms = config.timeout.as_millis(),
                attempts,
                "Timed out waiting for deletable state"
            );
            return WaitOutcome::TimedOut;
        }

        // Never sleep past the budget
        let delay = delays
            .next()
            .unwrap_or(config.max_delay)
            .min(config.timeout - elapsed);
        debug!(
            resource = %resource_name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            "Resource not ready, retrying"
        );

        // Wait with interruption support
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                if let Some(token) = interrupt {
                    token.cancelled().await
                } else {
                    std::future::pending::<()>().await
                }
            } => {
                debug!(resource = %resource_name, "State wait interrupted");
                return WaitOutcome::Interrupted;
            }
        }
    }
}

/// Wait until `adapter` reports resource `id` as deletable (or gone).
pub async fn wait_until_deletable(
    adapter: &dyn DeletionAdapter,
    id: &str,
    config: &WaitConfig,
    interrupt: Option<&CancellationToken>,
) -> WaitOutcome {
    let resource_name = format!("{} {}", adapter.kind(), id);
    let name = resource_name.as_str();
    wait_for_state(
        config,
        interrupt,
        move || async move {
            match adapter.describe_state(id).await? {
                Described::NotFound => Ok(Readiness::Gone),
                Described::State(state) if adapter.is_deletable(&state) => Ok(Readiness::Ready),
                Described::State(state) => {
                    debug!(resource = %name, state = %state, "Not yet deletable");
                    Ok(Readiness::Pending)
                }
            }
        },
        name,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_pending() {
        let calls = AtomicU32::new(0);
        let outcome = wait_for_state(
            &config(),
            None,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Readiness::Pending)
                } else {
                    Ok(Readiness::Ready)
                }
            },
            "asset a1",
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_budget() {
        let start = Instant::now();
        let outcome = wait_for_state(&config(), None, || async { Ok(Readiness::Pending) }, "x").await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6), "overshot budget: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let calls = AtomicU32::new(0);
        let outcome = wait_for_state(
            &config(),
            None,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AdapterError::Throttled)
                } else {
                    Ok(Readiness::Ready)
                }
            },
            "x",
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_fails() {
        let outcome = wait_for_state(
            &config(),
            None,
            || async { Err(AdapterError::AccessDenied("denied".into())) },
            "x",
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Failed(AdapterError::AccessDenied("denied".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_error_is_gone() {
        let outcome = wait_for_state(
            &config(),
            None,
            || async { Err(AdapterError::NotFound("a1".into())) },
            "x",
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Gone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_abandons_wait() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome =
            wait_for_state(&config(), Some(&token), || async { Ok(Readiness::Pending) }, "x").await;

        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
