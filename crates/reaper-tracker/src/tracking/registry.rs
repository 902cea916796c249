//! Thread-safe registry of live sessions and their resources

use super::types::{FailedRecord, ResourceRecord, Session, SessionId};
use crate::error::TrackerError;
use crate::result::CleanupResult;
use chrono::Utc;
use reaper_common::ResourceKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Process-wide registry of tracked sessions
///
/// Resources are registered immediately upon creation. A session stays in the
/// registry until its deletion pass completes, so an emergency sweep can see
/// everything that might still exist.
///
/// The handle is cheap to clone; all clones share the same state. Locks are
/// held only for map insert/remove/copy and never across an await point.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Live sessions (not yet cleaned up)
    sessions: Mutex<HashMap<SessionId, Session>>,
    /// Records that ended in a failed or skipped outcome
    failed: Mutex<Vec<FailedRecord>>,
}

/// Recover the guard from a poisoned lock; the maps stay consistent because
/// no critical section can panic halfway through a mutation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        lock(&self.inner.sessions)
    }

    /// Start tracking a new session
    pub fn begin_session(&self, label: Option<String>) -> SessionId {
        let id = SessionId::generate();
        self.sessions()
            .insert(id.clone(), Session::new(id.clone(), label));
        debug!(session_id = %id, "Session started");
        id
    }

    /// Register a resource with a session
    ///
    /// This should be called immediately after the resource is created,
    /// before any fallible operation that could leave it orphaned.
    /// Re-registering an identical record is a no-op.
    pub fn register(&self, session_id: &SessionId, record: ResourceRecord) -> Result<(), TrackerError> {
        let mut sessions = self.sessions();

        // Ownership is exclusive across live sessions
        if let Some(other) = sessions
            .values()
            .find(|s| s.id() != session_id && s.contains(record.kind(), record.id()))
        {
            return Err(TrackerError::DuplicateResource {
                kind: record.kind(),
                id: record.id().to_string(),
                detail: format!("owned by session {}", other.id()),
            });
        }

        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TrackerError::UnknownSession(session_id.to_string()))?;

        if session.is_closed() {
            return Err(TrackerError::SessionClosed(session_id.to_string()));
        }

        if let Some(existing) = session.get(record.kind(), record.id()) {
            if existing.same_identity(&record) {
                return Ok(());
            }
            return Err(TrackerError::DuplicateResource {
                kind: record.kind(),
                id: record.id().to_string(),
                detail: format!(
                    "registered with tier {}, not {}",
                    existing.dependency_tier(),
                    record.dependency_tier()
                ),
            });
        }

        debug!(
            session_id = %session_id,
            resource = %record.description(),
            tier = record.dependency_tier(),
            "Registered resource"
        );
        session.insert(record);
        Ok(())
    }

    /// Stop accepting registrations and return a snapshot for cleanup
    pub fn close_session(&self, session_id: &SessionId) -> Result<Session, TrackerError> {
        let mut sessions = self.sessions();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TrackerError::UnknownSession(session_id.to_string()))?;
        session.close();
        Ok(session.clone())
    }

    /// Close every live session at once, for an emergency sweep
    ///
    /// Returns snapshots of the sessions this call closed, and the ids of
    /// those that were already closed because another deletion pass owns
    /// them. Registrations made afterwards fail with `SessionClosed`.
    pub fn close_all_sessions(&self) -> (Vec<Session>, Vec<SessionId>) {
        let mut sessions = self.sessions();
        let mut closed = Vec::new();
        let mut draining = Vec::new();
        for session in sessions.values_mut() {
            if session.is_closed() {
                draining.push(session.id().clone());
            } else {
                session.close();
                closed.push(session.clone());
            }
        }
        (closed, draining)
    }

    /// Remove a session from tracking without cleanup
    pub fn unregister_session(&self, session_id: &SessionId) -> Result<Session, TrackerError> {
        self.sessions()
            .remove(session_id)
            .ok_or_else(|| TrackerError::UnknownSession(session_id.to_string()))
    }

    /// Finish a session after its deletion pass
    ///
    /// Removes the session and moves every record that did not reach a
    /// success outcome to the failed log. Returns `None` if another path
    /// (an emergency sweep, typically) already completed it.
    pub fn complete_session(&self, session_id: &SessionId, result: &CleanupResult) -> Option<Session> {
        let session = self.sessions().remove(session_id);
        match &session {
            Some(session) => self.record_failures(session, result),
            None => debug!(session_id = %session_id, "Session already completed"),
        }
        session
    }

    /// Append unsuccessful outcomes for `session` to the failed log
    pub fn record_failures(&self, session: &Session, result: &CleanupResult) {
        let now = Utc::now();
        let failures: Vec<FailedRecord> = result
            .unsuccessful()
            .filter_map(|report| {
                let record = session.get(report.kind, &report.id)?;
                Some(FailedRecord {
                    session_id: session.id().clone(),
                    record: record.clone(),
                    reason: report.outcome.to_string(),
                    failed_at: now,
                })
            })
            .collect();

        if failures.is_empty() {
            return;
        }

        for failure in &failures {
            warn!(
                session_id = %failure.session_id,
                resource = %failure.record.description(),
                reason = %failure.reason,
                "Resource moved to failed log"
            );
        }
        lock(&self.inner.failed).extend(failures);
    }

    /// Point-in-time copy of every live session
    ///
    /// The lock is held only while cloning, so callers never wait on a
    /// cleanup in progress.
    pub fn snapshot_all_sessions(&self) -> Vec<Session> {
        self.sessions().values().cloned().collect()
    }

    /// Copy of one live session
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions().get(session_id).cloned()
    }

    /// Which live session (if any) owns `(kind, id)`
    pub fn owner_of(&self, kind: ResourceKind, id: &str) -> Option<SessionId> {
        self.sessions()
            .values()
            .find(|s| s.contains(kind, id))
            .map(|s| s.id().clone())
    }

    /// Check whether a session is live
    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.sessions().contains_key(session_id)
    }

    /// Records that ended failed or skipped
    pub fn failed_records(&self) -> Vec<FailedRecord> {
        lock(&self.inner.failed).clone()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Check if there are no live sessions
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
