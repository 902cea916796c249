//! Process bootstrap
//!
//! [`Tracker`] owns the one registry of the process and wires the session
//! manager, the emergency coordinator and the orphan scanner around it.

use crate::adapter::AdapterSet;
use crate::config::TrackerConfig;
use crate::emergency::{EmergencyCoordinator, ShutdownTrigger, spawn_signal_source};
use crate::error::TrackerError;
use crate::orchestrator::CleanupOrchestrator;
use crate::report::CleanupReporter;
use crate::result::CleanupResult;
use crate::scanner::OrphanScanner;
use crate::session::SessionManager;
use crate::tracking::Registry;
use anyhow::{Context, Result, ensure};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Everything the tracker needs for one process
pub struct Tracker {
    config: TrackerConfig,
    registry: Registry,
    orchestrator: Arc<CleanupOrchestrator>,
    sessions: SessionManager,
    coordinator: Arc<EmergencyCoordinator>,
    scanner: OrphanScanner,
}

impl Tracker {
    pub fn new(config: TrackerConfig, adapters: AdapterSet) -> Result<Self> {
        config.check().context("Invalid tracker configuration")?;

        let registry = Registry::new();
        let orchestrator = Arc::new(
            CleanupOrchestrator::new(adapters)
                .with_retry(config.retry_policy())
                .with_wait(config.wait_config())
                .with_max_concurrent(config.max_concurrent_deletes),
        );
        let sessions = SessionManager::new(registry.clone(), orchestrator.clone())
            .with_tiers(config.tier_table())
            .with_marker(config.marker());
        let coordinator = Arc::new(EmergencyCoordinator::new(
            registry.clone(),
            orchestrator.clone(),
            config.shutdown_deadline(),
        ));
        let scanner = OrphanScanner::new(
            registry.clone(),
            orchestrator.clone(),
            config.tier_table(),
            config.scan_config(),
        );

        Ok(Self {
            config,
            registry,
            orchestrator,
            sessions,
            coordinator,
            scanner,
        })
    }

    /// Build from the file named by `REAPER_CONFIG` (or defaults)
    pub fn from_env(adapters: AdapterSet) -> Result<Self> {
        let config = TrackerConfig::from_env().context("Failed to load tracker configuration")?;
        Self::new(config, adapters)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn CleanupReporter>) -> Self {
        self.sessions = self.sessions.with_reporter(reporter);
        self
    }

    /// Reclaim orphans, then install emergency cleanup on process signals
    ///
    /// Call once, before creating any resource.
    pub async fn start(&self) -> Result<CleanupResult> {
        ensure!(!self.coordinator.is_installed(), "Tracker already started");
        self.start_with_triggers(spawn_signal_source()).await
    }

    /// Like [`start`](Self::start), with an explicit trigger source
    pub async fn start_with_triggers(&self, triggers: mpsc::Receiver<ShutdownTrigger>) -> Result<CleanupResult> {
        ensure!(self.coordinator.install(triggers), "Tracker already started");

        let reclaimed = self.scanner.scan_and_reclaim().await;
        if !reclaimed.is_empty() {
            self.sessions.reporter().report(&reclaimed);
        }
        info!(
            owner = %self.config.owner,
            orphans = reclaimed.reports.len(),
            "Resource tracker started"
        );
        Ok(reclaimed)
    }

    /// Run the host's main future, sweeping every live session when it ends
    ///
    /// On Ctrl-C or SIGTERM the host is abandoned once the interrupt sweep
    /// is done, and this returns [`TrackerError::Interrupted`]; exit with a
    /// non-zero status then.
    pub async fn run<F, T>(&self, host: F) -> Result<T, TrackerError>
    where
        F: Future<Output = T>,
    {
        self.coordinator.guard_process(host).await
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<CleanupOrchestrator> {
        &self.orchestrator
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn coordinator(&self) -> &Arc<EmergencyCoordinator> {
        &self.coordinator
    }

    pub fn scanner(&self) -> &OrphanScanner {
        &self.scanner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_common::ResourceKind;

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let tracker = Tracker::new(TrackerConfig::default(), AdapterSet::new()).unwrap();
        let (_tx, rx) = mpsc::channel(1);
        let reclaimed = tracker.start_with_triggers(rx).await.unwrap();
        assert!(reclaimed.is_empty());

        let (_tx2, rx2) = mpsc::channel(1);
        assert!(tracker.start_with_triggers(rx2).await.is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackerConfig {
            max_concurrent_deletes: 0,
            ..Default::default()
        };
        assert!(Tracker::new(config, AdapterSet::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_channel_drives_sweep() {
        let tracker = Tracker::new(TrackerConfig::default(), AdapterSet::new()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        tracker.start_with_triggers(rx).await.unwrap();

        let sid = tracker.sessions().begin_session(None);
        tracker
            .sessions()
            .register(&sid, ResourceKind::Gateway, "g1")
            .unwrap();

        tx.send(ShutdownTrigger::Interrupt).await.unwrap();
        while tracker.coordinator().sweep_count() == 0 {
            tokio::task::yield_now().await;
        }
        tracker.coordinator().wait_for_sweep().await;

        assert!(tracker.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_run() {
        let tracker = Tracker::new(TrackerConfig::default(), AdapterSet::new()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        tracker.start_with_triggers(rx).await.unwrap();

        let sessions = tracker.sessions().clone();
        let outcome = tracker
            .run(async move {
                let sid = sessions.begin_session(Some("long".into()));
                sessions.register(&sid, ResourceKind::Gateway, "g1").unwrap();
                tx.send(ShutdownTrigger::Interrupt).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                "host finished"
            })
            .await;

        assert_eq!(outcome, Err(TrackerError::Interrupted));
        assert!(tracker.registry().is_empty());
        assert_eq!(tracker.registry().failed_records().len(), 1);
    }
}
