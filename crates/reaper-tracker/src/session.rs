//! Session scopes
//!
//! A session is begun before the first resource is created and ended on
//! every exit path of the work that owns it. [`SessionManager::with_session`]
//! wraps an async body; [`SessionGuard`] is the RAII form for code that
//! cannot be expressed as one closure.

use crate::error::TrackerError;
use crate::orchestrator::CleanupOrchestrator;
use crate::report::{CleanupReporter, TracingReporter};
use crate::result::CleanupResult;
use crate::tracking::{Registry, ResourceRecord, SessionId};
use chrono::Utc;
use futures::FutureExt;
use reaper_common::{OwnershipMarker, ResourceKind, TierTable};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Begins, registers into and ends sessions
///
/// Cheap to clone; clones share the registry and orchestrator.
#[derive(Clone)]
pub struct SessionManager {
    registry: Registry,
    orchestrator: Arc<CleanupOrchestrator>,
    reporter: Arc<dyn CleanupReporter>,
    tiers: TierTable,
    marker: OwnershipMarker,
    /// Cleanups of dropped guards
    background: TaskTracker,
}

impl SessionManager {
    pub fn new(registry: Registry, orchestrator: Arc<CleanupOrchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
            reporter: Arc::new(TracingReporter),
            tiers: TierTable::default(),
            marker: OwnershipMarker::default(),
            background: TaskTracker::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn CleanupReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_marker(mut self, marker: OwnershipMarker) -> Self {
        self.marker = marker;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn reporter(&self) -> &Arc<dyn CleanupReporter> {
        &self.reporter
    }

    pub fn begin_session(&self, label: Option<String>) -> SessionId {
        self.registry.begin_session(label)
    }

    /// Register a freshly created resource, tiered by the configured table
    ///
    /// Call this right after the create call succeeds and before anything
    /// else that can fail.
    pub fn register(&self, session_id: &SessionId, kind: ResourceKind, id: impl Into<String>) -> Result<(), TrackerError> {
        self.registry
            .register(session_id, ResourceRecord::tiered(kind, id, &self.tiers))
    }

    /// Tags to attach to a resource created under `session_id`
    pub fn ownership_tags(&self, session_id: &SessionId) -> BTreeMap<String, String> {
        self.marker.tags_for(session_id.as_str(), Utc::now())
    }

    /// Run the deletion pass for a session and stop tracking it
    ///
    /// Registration is closed first, so a resource registered concurrently
    /// either makes it into the pass or is rejected with `SessionClosed`.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<CleanupResult, TrackerError> {
        let session = self.registry.close_session(session_id)?;
        let result = self.orchestrator.cleanup(&session).await;
        if self.registry.complete_session(session_id, &result).is_none() {
            debug!(session_id = %session_id, "Session was completed by another cleanup path");
        }
        self.reporter.report(&result);
        Ok(result)
    }

    /// [`end_session`](Self::end_session) for scope exits, where an already
    /// completed session is not an error
    async fn finish_session(&self, session_id: &SessionId) -> CleanupResult {
        match self.end_session(session_id).await {
            Ok(result) => result,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Session already ended");
                CleanupResult::new(session_id.clone())
            }
        }
    }

    /// Run `body` inside a fresh session and always end the session after it
    ///
    /// The session is ended whether the body returns (with any value, errors
    /// included) or panics. A panic is resumed once cleanup has finished.
    pub async fn with_session<F, Fut, T>(&self, label: impl Into<String>, body: F) -> (T, CleanupResult)
    where
        F: FnOnce(SessionId) -> Fut,
        Fut: Future<Output = T>,
    {
        let session_id = self.begin_session(Some(label.into()));
        let outcome = AssertUnwindSafe(async { body(session_id.clone()).await })
            .catch_unwind()
            .await;

        let result = self.finish_session(&session_id).await;
        match outcome {
            Ok(value) => (value, result),
            Err(panic) => {
                error!(session_id = %session_id, "Session body panicked; resources cleaned up");
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Begin a session owned by a guard
    pub fn scope(&self, label: impl Into<String>) -> SessionGuard {
        SessionGuard {
            id: self.begin_session(Some(label.into())),
            manager: self.clone(),
            finished: false,
        }
    }

    /// Wait for cleanups handed off by dropped guards
    pub async fn drain_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }
}

/// RAII guard for one session
///
/// Call [`finish`](Self::finish) to clean up inline and get the result.
/// When dropped without `finish()`, the session is handed to a background
/// task for cleanup.
pub struct SessionGuard {
    id: SessionId,
    manager: SessionManager,
    finished: bool,
}

impl SessionGuard {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn register(&self, kind: ResourceKind, id: impl Into<String>) -> Result<(), TrackerError> {
        self.manager.register(&self.id, kind, id)
    }

    pub fn ownership_tags(&self) -> BTreeMap<String, String> {
        self.manager.ownership_tags(&self.id)
    }

    /// End the session now
    pub async fn finish(mut self) -> CleanupResult {
        self.finished = true;
        self.manager.finish_session(&self.id).await
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session_id = %self.id, "Session guard dropped, cleaning up in background");
                let manager = self.manager.clone();
                let id = self.id.clone();
                handle.spawn(self.manager.background.track_future(async move {
                    manager.finish_session(&id).await;
                }));
            }
            Err(_) => {
                // Still in the registry: the emergency sweep or the next
                // orphan scan picks it up
                warn!(session_id = %self.id, "Session guard dropped outside a runtime, cleanup deferred");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterSet;
    use crate::result::{ResourceOutcome, SkipReason};
    use reaper_common::tags::{TAG_OWNER, TAG_SESSION_ID};

    fn manager() -> SessionManager {
        SessionManager::new(
            Registry::new(),
            Arc::new(CleanupOrchestrator::new(AdapterSet::new())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_removes_and_closes() {
        let manager = manager();
        let sid = manager.begin_session(None);
        manager.register(&sid, ResourceKind::Asset, "a1").unwrap();

        let result = manager.end_session(&sid).await.unwrap();

        // No adapters: skipped, recorded as failed
        assert_eq!(
            result.outcome_of(ResourceKind::Asset, "a1"),
            Some(&ResourceOutcome::Skipped(SkipReason::NoAdapter))
        );
        assert!(manager.registry().is_empty());
        assert_eq!(manager.registry().failed_records().len(), 1);
        assert_eq!(
            manager.end_session(&sid).await.unwrap_err(),
            TrackerError::UnknownSession(sid.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_session_ends_on_error() {
        let manager = manager();
        let (value, result): (Result<(), &str>, _) = manager
            .with_session("errs", |sid| {
                let manager = manager.clone();
                async move {
                    manager.register(&sid, ResourceKind::Project, "p1").unwrap();
                    Err("body failed")
                }
            })
            .await;

        assert_eq!(value, Err("body failed"));
        assert_eq!(result.reports.len(), 1);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_session_ends_on_panic() {
        let manager = manager();
        let registry = manager.registry().clone();

        let outcome = AssertUnwindSafe(manager.with_session("panics", |sid| {
            let manager = manager.clone();
            async move {
                manager.register(&sid, ResourceKind::Asset, "a1").unwrap();
                if !sid.as_str().is_empty() {
                    panic!("body panicked");
                }
            }
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.failed_records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_cleans_up_in_background() {
        let manager = manager();
        {
            let guard = manager.scope("dropped");
            guard.register(ResourceKind::Dashboard, "d1").unwrap();
        }
        manager.drain_background().await;
        assert!(manager.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_returns_result() {
        let manager = manager();

        let guard = manager.scope("finished");
        let tags = guard.ownership_tags();
        assert_eq!(tags.get(TAG_OWNER).map(String::as_str), Some("reaper"));
        assert_eq!(tags.get(TAG_SESSION_ID).map(String::as_str), Some(guard.id().as_str()));

        let result = guard.finish().await;
        assert!(result.is_success());
        assert!(manager.registry().is_empty());
    }
}
