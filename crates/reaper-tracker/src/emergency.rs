//! Emergency cleanup on abnormal termination
//!
//! Shutdown triggers (interrupt signals, the host leaving its main future,
//! a panic escaping it) arrive as plain events. The reaction is
//! [`EmergencyCoordinator::on_trigger`]: sweep every live session once,
//! sequentially, under a global deadline.

use crate::error::{AdapterError, TrackerError};
use crate::orchestrator::CleanupOrchestrator;
use crate::result::{CleanupResult, CleanupSummary};
use crate::tracking::{Registry, SessionId};
use crate::wait::{Readiness, WaitConfig, WaitOutcome, wait_for_state};
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Poll bounds while waiting for sessions another pass is deleting
const DRAIN_POLL_INITIAL: Duration = Duration::from_millis(50);
const DRAIN_POLL_MAX: Duration = Duration::from_millis(500);

/// Why an emergency sweep was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownTrigger {
    /// Operator abort (Ctrl-C, SIGTERM)
    Interrupt,
    /// Host process is leaving its main path (normally or by panic)
    Exit,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownTrigger::Interrupt => "interrupt",
            ShutdownTrigger::Exit => "exit",
        })
    }
}

/// Outcome of one emergency sweep
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyReport {
    pub trigger: ShutdownTrigger,
    /// One result per swept session, in sweep order
    pub results: Vec<CleanupResult>,
}

impl EmergencyReport {
    fn new(trigger: ShutdownTrigger) -> Self {
        Self {
            trigger,
            results: Vec::new(),
        }
    }

    /// Counts across every swept session
    pub fn summary(&self) -> CleanupSummary {
        self.results
            .iter()
            .map(CleanupResult::summary)
            .fold(CleanupSummary::default(), |mut acc, s| {
                acc.total += s.total;
                acc.deleted += s.deleted;
                acc.not_found += s.not_found;
                acc.failed += s.failed;
                acc.skipped += s.skipped;
                acc
            })
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(CleanupResult::is_success)
    }
}

/// Runs at most one emergency sweep at a time over every live session
pub struct EmergencyCoordinator {
    registry: Registry,
    orchestrator: Arc<CleanupOrchestrator>,
    shutdown_deadline: Duration,
    /// Held for the whole duration of a sweep
    sweep: Mutex<()>,
    /// Cancelled once an interrupt sweep has finished
    shutdown: CancellationToken,
    installed: AtomicBool,
    sweeps: AtomicUsize,
}

impl EmergencyCoordinator {
    pub fn new(registry: Registry, orchestrator: Arc<CleanupOrchestrator>, shutdown_deadline: Duration) -> Self {
        Self {
            registry,
            orchestrator,
            shutdown_deadline,
            sweep: Mutex::new(()),
            shutdown: CancellationToken::new(),
            installed: AtomicBool::new(false),
            sweeps: AtomicUsize::new(0),
        }
    }

    /// Subscribe to a trigger source
    ///
    /// Only the first call per coordinator has any effect; later calls return
    /// `false` and drop their receiver. Must be called inside a Tokio runtime.
    pub fn install(self: &Arc<Self>, mut triggers: mpsc::Receiver<ShutdownTrigger>) -> bool {
        if self.installed.swap(true, Ordering::SeqCst) {
            debug!("Emergency coordinator already installed");
            return false;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(trigger) = triggers.recv().await {
                // Each trigger reacts on its own task so that a repeated
                // trigger reaches `on_trigger` while a sweep is running
                let coordinator = Arc::clone(&this);
                tokio::spawn(async move {
                    coordinator.on_trigger(trigger).await;
                });
            }
            debug!("Shutdown trigger source closed");
        });
        info!("Emergency cleanup installed");
        true
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Sweeps started so far
    pub fn sweep_count(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Check whether an interrupt sweep has finished and the host should stop
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// React to a shutdown trigger
    ///
    /// Returns `None` if a sweep is already in progress; the trigger is
    /// coalesced into it rather than starting another one. A coalesced
    /// interrupt returns once that sweep has finished.
    ///
    /// After an interrupt sweep the coordinator is shutting down, and
    /// [`guard_process`](Self::guard_process) stops waiting for the host.
    pub async fn on_trigger(&self, trigger: ShutdownTrigger) -> Option<EmergencyReport> {
        let Ok(sweeping) = self.sweep.try_lock() else {
            info!(trigger = %trigger, "Emergency cleanup already running, ignoring trigger");
            if trigger == ShutdownTrigger::Interrupt {
                self.wait_for_sweep().await;
                self.shutdown.cancel();
            }
            return None;
        };
        self.sweeps.fetch_add(1, Ordering::SeqCst);

        let report = self.sweep_all(trigger).await;
        if trigger == ShutdownTrigger::Interrupt {
            self.shutdown.cancel();
        }
        drop(sweeping);
        Some(report)
    }

    async fn sweep_all(&self, trigger: ShutdownTrigger) -> EmergencyReport {
        // Waits are abandoned from here on; deletes go straight through
        self.orchestrator.interrupt();

        let mut report = EmergencyReport::new(trigger);
        let (sessions, draining) = self.registry.close_all_sessions();
        if sessions.is_empty() && draining.is_empty() {
            debug!(trigger = %trigger, "No live sessions to sweep");
            return report;
        }

        let deadline = Instant::now() + self.shutdown_deadline;
        warn!(
            trigger = %trigger,
            sessions = sessions.len(),
            draining = draining.len(),
            deadline_secs = self.shutdown_deadline.as_secs(),
            "Running emergency cleanup"
        );

        for session in sessions {
            let result = self.orchestrator.cleanup_until(&session, Some(deadline)).await;
            for failure in result.unsuccessful() {
                error!(
                    session_id = %session.id(),
                    kind = %failure.kind,
                    id = %failure.id,
                    outcome = %failure.outcome,
                    "Emergency cleanup could not delete resource"
                );
            }
            self.registry.complete_session(session.id(), &result);
            report.results.push(result);
        }

        self.await_draining(&draining, deadline).await;

        let summary = report.summary();
        info!(
            trigger = %trigger,
            sessions = report.results.len(),
            deleted = summary.deleted,
            not_found = summary.not_found,
            failed = summary.failed,
            skipped = summary.skipped,
            "Emergency cleanup finished"
        );
        report
    }

    /// Wait (until `deadline`) for passes already running on other sessions
    async fn await_draining(&self, draining: &[SessionId], deadline: Instant) {
        if draining.is_empty() {
            return;
        }
        let budget = deadline.saturating_duration_since(Instant::now());
        let config = WaitConfig {
            initial_delay: DRAIN_POLL_INITIAL,
            max_delay: DRAIN_POLL_MAX,
            timeout: budget,
        };
        let registry = &self.registry;
        let outcome = wait_for_state(
            &config,
            None,
            move || async move {
                let live = draining.iter().any(|id| registry.is_live(id));
                Ok::<_, AdapterError>(if live { Readiness::Pending } else { Readiness::Ready })
            },
            "draining sessions",
        )
        .await;
        if outcome == WaitOutcome::TimedOut {
            warn!(sessions = draining.len(), "Deadline reached while other cleanups were still running");
        }
    }

    /// Wait for any sweep in progress to finish
    pub async fn wait_for_sweep(&self) {
        drop(self.sweep.lock().await);
    }

    /// Run the host's main future and sweep when it ends
    ///
    /// The sweep runs whether the future completes, panics, or is abandoned
    /// because an interrupt sweep finished first. A panic is resumed once
    /// the sweep (or a sweep already running) has finished; an abandoned
    /// host yields [`TrackerError::Interrupted`].
    pub async fn guard_process<F, T>(&self, host: F) -> Result<T, TrackerError>
    where
        F: Future<Output = T>,
    {
        let outcome = tokio::select! {
            biased;
            outcome = AssertUnwindSafe(host).catch_unwind() => Some(outcome),
            () = self.shutdown.cancelled() => None,
        };
        match &outcome {
            Some(Ok(_)) => {}
            Some(Err(_)) => error!("Host panicked, running emergency cleanup"),
            None => warn!("Interrupted, abandoning host"),
        }

        if self.on_trigger(ShutdownTrigger::Exit).await.is_none() {
            self.wait_for_sweep().await;
        }

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => Err(TrackerError::Interrupted),
        }
    }
}

/// Forward process signals (Ctrl-C, and SIGTERM on unix) as
/// [`ShutdownTrigger::Interrupt`] events
///
/// Must be called inside a Tokio runtime.
pub fn spawn_signal_source() -> mpsc::Receiver<ShutdownTrigger> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(forward_signals(tx));
    rx
}

async fn forward_signals(tx: mpsc::Sender<ShutdownTrigger>) {
    loop {
        if let Err(e) = wait_for_signal().await {
            warn!(error = %e, "Failed to listen for shutdown signals");
            return;
        }
        info!("Shutdown signal received");
        if tx.send(ShutdownTrigger::Interrupt).await.is_err() {
            return;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterSet;
    use crate::tracking::ResourceRecord;
    use reaper_common::ResourceKind;

    fn coordinator(registry: &Registry) -> Arc<EmergencyCoordinator> {
        Arc::new(EmergencyCoordinator::new(
            registry.clone(),
            Arc::new(CleanupOrchestrator::new(AdapterSet::new())),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_is_idempotent() {
        let coordinator = coordinator(&Registry::new());
        let (_tx1, rx1) = mpsc::channel(1);
        let (_tx2, rx2) = mpsc::channel(1);

        assert!(coordinator.install(rx1));
        assert!(!coordinator.install(rx2));
        assert!(coordinator.is_installed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_completes_sessions_and_interrupts() {
        let registry = Registry::new();
        let sid = registry.begin_session(None);
        registry
            .register(&sid, ResourceRecord::new(ResourceKind::Asset, "a1"))
            .unwrap();
        let coordinator = coordinator(&registry);

        let report = coordinator.on_trigger(ShutdownTrigger::Interrupt).await.unwrap();

        assert_eq!(report.results.len(), 1);
        // No adapter for assets: skipped, and logged as failed
        assert_eq!(report.summary().skipped, 1);
        assert!(registry.is_empty());
        assert_eq!(registry.failed_records().len(), 1);
        assert!(coordinator.orchestrator.is_interrupted());
    }

    fn failing_host() -> u32 {
        panic!("host failed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_process_sweeps_on_panic() {
        let registry = Registry::new();
        let sid = registry.begin_session(None);
        registry
            .register(&sid, ResourceRecord::new(ResourceKind::Gateway, "g1"))
            .unwrap();
        let coordinator = coordinator(&registry);

        let guarded = AssertUnwindSafe(coordinator.guard_process(async { failing_host() }))
        .catch_unwind()
        .await;

        assert!(guarded.is_err());
        assert!(registry.is_empty());
        assert_eq!(coordinator.sweep_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_process_returns_value() {
        let coordinator = coordinator(&Registry::new());
        assert_eq!(coordinator.guard_process(async { 7 }).await, Ok(7));
        assert_eq!(coordinator.sweep_count(), 1);
        assert!(!coordinator.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_abandons_host() {
        let coordinator = coordinator(&Registry::new());
        let (tx, rx) = mpsc::channel(1);
        assert!(coordinator.install(rx));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(ShutdownTrigger::Interrupt).await.unwrap();
        });

        let start = Instant::now();
        let outcome = coordinator
            .guard_process(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                "host finished"
            })
            .await;

        assert_eq!(outcome, Err(TrackerError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_sweep_does_not_shut_down() {
        let coordinator = coordinator(&Registry::new());
        coordinator.on_trigger(ShutdownTrigger::Exit).await.unwrap();
        assert!(!coordinator.is_shutting_down());

        coordinator.on_trigger(ShutdownTrigger::Interrupt).await.unwrap();
        assert!(coordinator.is_shutting_down());
    }
}
