//! Tiered deletion of a session's resources
//!
//! Records are grouped by dependency tier and deleted tier by tier, lowest
//! first. Inside a tier, deletions run concurrently; the next tier only
//! starts once every record of the current one reached a terminal outcome.

use crate::adapter::{AdapterSet, DeleteOutcome};
use crate::result::{CleanupResult, ResourceOutcome, ResourceReport, SkipReason};
use crate::retry::{self, RetryPolicy};
use crate::tracking::{ResourceRecord, Session};
use crate::wait::{WaitConfig, WaitOutcome, wait_until_deletable};
use futures::stream::{self, StreamExt};
use reaper_common::defaults::DEFAULT_MAX_CONCURRENT_DELETES;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Group records by tier, ascending
pub fn plan_tiers<'a, I>(records: I) -> BTreeMap<u8, Vec<&'a ResourceRecord>>
where
    I: IntoIterator<Item = &'a ResourceRecord>,
{
    records
        .into_iter()
        .fold(BTreeMap::new(), |mut tiers, record| {
            tiers
                .entry(record.dependency_tier())
                .or_insert_with(Vec::new)
                .push(record);
            tiers
        })
}

/// Deletes sessions through their deletion adapters
///
/// The orchestrator is the error boundary for cleanup: every call returns a
/// [`CleanupResult`], whatever the adapters did.
pub struct CleanupOrchestrator {
    adapters: AdapterSet,
    retry: RetryPolicy,
    wait: WaitConfig,
    max_concurrent: usize,
    interrupt: CancellationToken,
}

impl CleanupOrchestrator {
    pub fn new(adapters: AdapterSet) -> Self {
        Self {
            adapters,
            retry: RetryPolicy::default(),
            wait: WaitConfig::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_DELETES,
            interrupt: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Upper bound on concurrent deletions inside one tier
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Stop waiting for deletable states and stop backing off
    ///
    /// Used when the process is shutting down. Deletes are still attempted;
    /// only the waits between them are dropped. There is no way back.
    pub fn interrupt(&self) {
        if !self.interrupt.is_cancelled() {
            debug!("Cleanup orchestrator interrupted");
        }
        self.interrupt.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Delete every record in `session`
    pub async fn cleanup(&self, session: &Session) -> CleanupResult {
        self.cleanup_until(session, None).await
    }

    /// Delete every record in `session`, giving up at `deadline`
    ///
    /// Records that have not finished by the deadline, including those in
    /// tiers never reached, are reported as `Skipped(Timeout)`.
    pub async fn cleanup_until(&self, session: &Session, deadline: Option<Instant>) -> CleanupResult {
        let mut result = CleanupResult::new(session.id().clone());
        if session.is_empty() {
            debug!(session_id = %session.id(), "Nothing to clean up");
            return result;
        }

        let plan = plan_tiers(session.records());
        info!(
            session_id = %session.id(),
            resources = session.len(),
            tiers = plan.len(),
            "Starting cleanup"
        );

        for (tier, records) in plan {
            if deadline_passed(deadline) {
                for record in records {
                    result.push(ResourceReport::new(
                        record,
                        ResourceOutcome::Skipped(SkipReason::Timeout),
                        0,
                    ));
                }
                continue;
            }

            debug!(tier, count = records.len(), "Deleting tier");
            // Built eagerly: a lazy `map` closure here makes the pass non-`Send`
            let pending: Vec<_> = records
                .into_iter()
                .map(|record| self.reclaim_within(record, deadline))
                .collect();
            let reports: Vec<ResourceReport> = stream::iter(pending)
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;
            result.reports.extend(reports);
        }

        let summary = result.summary();
        if summary.failed + summary.skipped > 0 {
            warn!(
                session_id = %session.id(),
                deleted = summary.deleted,
                not_found = summary.not_found,
                failed = summary.failed,
                skipped = summary.skipped,
                "Cleanup finished with failures"
            );
        } else {
            info!(
                session_id = %session.id(),
                deleted = summary.deleted,
                not_found = summary.not_found,
                "Cleanup complete"
            );
        }
        result
    }

    async fn reclaim_within(&self, record: &ResourceRecord, deadline: Option<Instant>) -> ResourceReport {
        let attempts = AtomicU32::new(0);
        let Some(deadline) = deadline else {
            return self.reclaim(record, &attempts).await;
        };
        if Instant::now() >= deadline {
            return ResourceReport::new(record, ResourceOutcome::Skipped(SkipReason::Timeout), 0);
        }

        match tokio::time::timeout_at(deadline, self.reclaim(record, &attempts)).await {
            Ok(report) => report,
            Err(_) => {
                let attempts = attempts.load(Ordering::Relaxed);
                warn!(
                    resource = %record.description(),
                    attempts,
                    "Shutdown deadline reached before deletion finished"
                );
                ResourceReport::new(record, ResourceOutcome::Skipped(SkipReason::Timeout), attempts)
            }
        }
    }

    /// Wait for a deletable state, then delete with retries
    ///
    /// `attempts` counts delete calls as they start, so a caller that gives
    /// up on this future still knows how many reached the provider.
    async fn reclaim(&self, record: &ResourceRecord, attempts: &AtomicU32) -> ResourceReport {
        let Some(adapter) = self.adapters.get(record.kind()) else {
            warn!(resource = %record.description(), "No deletion adapter registered for kind");
            return ResourceReport::new(record, ResourceOutcome::Skipped(SkipReason::NoAdapter), 0);
        };
        let interrupt = Some(&self.interrupt);

        match wait_until_deletable(adapter.as_ref(), record.id(), &self.wait, interrupt).await {
            WaitOutcome::Ready | WaitOutcome::Interrupted => {}
            WaitOutcome::Gone => {
                debug!(resource = %record.description(), "Resource already deleted");
                return ResourceReport::new(record, ResourceOutcome::NotFound, 0);
            }
            WaitOutcome::TimedOut => {
                return ResourceReport::new(
                    record,
                    ResourceOutcome::Skipped(SkipReason::StateWaitTimeout),
                    0,
                );
            }
            WaitOutcome::Failed(e) => {
                return ResourceReport::new(record, ResourceOutcome::Failed(e.to_string()), 0);
            }
        }

        let label = record.description();
        let attempted = retry::attempt(&self.retry, interrupt, &label, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            adapter.delete(record.id())
        })
        .await;

        let outcome = match attempted.result {
            Ok(DeleteOutcome::Deleted) => {
                info!(resource = %label, attempts = attempted.attempts, "Deleted");
                ResourceOutcome::Deleted
            }
            Ok(DeleteOutcome::NotFound) => {
                debug!(resource = %label, "Resource already deleted");
                ResourceOutcome::NotFound
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %label, "Resource already deleted");
                ResourceOutcome::NotFound
            }
            Err(e) => {
                warn!(
                    resource = %label,
                    attempts = attempted.attempts,
                    error = %e,
                    "Failed to delete"
                );
                ResourceOutcome::Failed(e.to_string())
            }
        };
        ResourceReport::new(record, outcome, attempted.attempts)
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DeletionAdapter, Described, ResourceState};
    use crate::error::AdapterError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use reaper_common::ResourceKind;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Adapter whose deletes always succeed, logging the ids it saw
    struct Recording {
        kind: ResourceKind,
        deleted: Arc<Mutex<Vec<String>>>,
        delete_error: Option<AdapterError>,
    }

    #[async_trait]
    impl DeletionAdapter for Recording {
        fn kind(&self) -> ResourceKind {
            self.kind
        }

        async fn describe_state(&self, _id: &str) -> Result<Described, AdapterError> {
            Ok(Described::State(ResourceState::new("ACTIVE")))
        }

        fn is_deletable(&self, _state: &ResourceState) -> bool {
            true
        }

        async fn delete(&self, id: &str) -> Result<DeleteOutcome, AdapterError> {
            self.deleted.lock().unwrap().push(id.to_string());
            match &self.delete_error {
                Some(e) => Err(e.clone()),
                None => Ok(DeleteOutcome::Deleted),
            }
        }
    }

    fn recording(kind: ResourceKind, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn DeletionAdapter> {
        Arc::new(Recording {
            kind,
            deleted: log.clone(),
            delete_error: None,
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_adapter_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = CleanupOrchestrator::new(
            AdapterSet::new().with(recording(ResourceKind::Asset, &log)),
        );
        let session = Session::from_records(
            "s1".into(),
            [
                ResourceRecord::new(ResourceKind::Asset, "a1"),
                ResourceRecord::new(ResourceKind::Gateway, "g1"),
            ],
        );

        let result = orchestrator.cleanup(&session).await;

        assert_eq!(result.outcome_of(ResourceKind::Asset, "a1"), Some(&ResourceOutcome::Deleted));
        assert_eq!(
            result.outcome_of(ResourceKind::Gateway, "g1"),
            Some(&ResourceOutcome::Skipped(SkipReason::NoAdapter))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_recorded_as_failed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let adapter: Arc<dyn DeletionAdapter> = Arc::new(Recording {
            kind: ResourceKind::Dashboard,
            deleted: log.clone(),
            delete_error: Some(AdapterError::AccessDenied("no".into())),
        });
        let orchestrator = CleanupOrchestrator::new(AdapterSet::new().with(adapter)).with_retry(fast_retry());
        let session = Session::from_records("s1".into(), [ResourceRecord::new(ResourceKind::Dashboard, "d1")]);

        let result = orchestrator.cleanup(&session).await;

        assert_eq!(result.reports.len(), 1);
        assert_eq!(result.reports[0].attempts, 1);
        assert!(matches!(result.reports[0].outcome, ResourceOutcome::Failed(_)));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_skips_everything() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = CleanupOrchestrator::new(
            AdapterSet::new().with(recording(ResourceKind::Asset, &log)),
        );
        let session = Session::from_records(
            "s1".into(),
            [
                ResourceRecord::new(ResourceKind::Asset, "a1"),
                ResourceRecord::new(ResourceKind::Asset, "a2"),
            ],
        );

        let result = orchestrator
            .cleanup_until(&session, Some(Instant::now()))
            .await;

        assert_eq!(result.summary().skipped, 2);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_session() {
        let orchestrator = CleanupOrchestrator::new(AdapterSet::new());
        let result = orchestrator.cleanup(&Session::new("s1".into(), None)).await;
        assert!(result.is_empty());
        assert!(result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_on_spawned_task() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Arc::new(CleanupOrchestrator::new(
            AdapterSet::new()
                .with(recording(ResourceKind::Asset, &log))
                .with(recording(ResourceKind::AssetModel, &log)),
        ));
        let session = Session::from_records(
            "s1".into(),
            [
                ResourceRecord::new(ResourceKind::AssetModel, "m1"),
                ResourceRecord::new(ResourceKind::Asset, "a1"),
                ResourceRecord::new(ResourceKind::Asset, "a2"),
            ],
        );

        let task = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.cleanup_until(&session, None).await }
        });
        let result = task.await.unwrap();

        assert_eq!(result.summary().deleted, 3);
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("m1"));
    }

    fn kind_strategy() -> impl Strategy<Value = ResourceKind> {
        prop::sample::select(ResourceKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_plan_is_ascending_and_complete(
            kinds in prop::collection::vec(kind_strategy(), 0..40)
        ) {
            let records: Vec<ResourceRecord> = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| ResourceRecord::new(*kind, format!("r{i}")))
                .collect();

            let plan = plan_tiers(&records);

            let tiers: Vec<u8> = plan.keys().copied().collect();
            prop_assert!(tiers.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(plan.values().map(Vec::len).sum::<usize>(), records.len());
            for (tier, group) in &plan {
                prop_assert!(group.iter().all(|r| r.dependency_tier() == *tier));
            }
        }
    }
}
