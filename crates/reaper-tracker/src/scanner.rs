//! Orphan scanner
//!
//! Finds tracker-owned resources left behind by a process that died before
//! any cleanup path ran, and feeds them through the orchestrator. Discovery
//! goes straight to the provider (through each adapter's `list_owned`), so it
//! works even when nothing about the previous run survived locally.

use crate::adapter::DiscoveredResource;
use crate::orchestrator::CleanupOrchestrator;
use crate::result::CleanupResult;
use crate::tracking::{Registry, ResourceRecord, Session, SessionId};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use reaper_common::defaults::DEFAULT_ORPHAN_MIN_AGE_SECS;
use reaper_common::tags::{self, TAG_CREATED_AT, TAG_OWNER, TAG_SESSION_ID, TAG_STATUS};
use reaper_common::{OwnershipMarker, ResourceKind, TierTable};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Session id used for the merged result of an orphan reclaim
pub const ORPHAN_SCAN_SESSION: &str = "orphan-scan";

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Only find resources older than this duration
    pub min_age: Duration,
    /// Only find resources from this session
    pub session_id: Option<String>,
    /// Include resources in "creating" status (be careful!)
    pub include_creating: bool,
    /// Owner to look for
    pub marker: OwnershipMarker,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::seconds(DEFAULT_ORPHAN_MIN_AGE_SECS as i64),
            session_id: None,
            include_creating: false,
            marker: OwnershipMarker::default(),
        }
    }
}

/// A discovered resource that passed every filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub kind: ResourceKind,
    pub id: String,
    /// Session that created it (from tags, else from the name)
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub tags: BTreeMap<String, String>,
}

/// Result of a dry-run scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub orphans: Vec<Orphan>,
    /// One entry per kind whose listing failed
    pub errors: Vec<String>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty() && self.errors.is_empty()
    }
}

/// Reclaims resources that outlived their session
pub struct OrphanScanner {
    registry: Registry,
    orchestrator: Arc<CleanupOrchestrator>,
    tiers: TierTable,
    config: ScanConfig,
}

impl OrphanScanner {
    pub fn new(
        registry: Registry,
        orchestrator: Arc<CleanupOrchestrator>,
        tiers: TierTable,
        config: ScanConfig,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            tiers,
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// List orphans without deleting anything
    pub async fn scan(&self) -> ScanReport {
        let marker = &self.config.marker;
        let listings = join_all(
            self.orchestrator
                .adapters()
                .iter()
                .map(|adapter| async move { (adapter.kind(), adapter.list_owned(marker).await) }),
        )
        .await;

        let now = Utc::now();
        let mut report = ScanReport::default();
        for (kind, listing) in listings {
            match listing {
                Ok(found) => {
                    debug!(kind = %kind, count = found.len(), "Listed owned resources");
                    report
                        .orphans
                        .extend(found.into_iter().filter_map(|r| self.classify(r, now)));
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to list resources");
                    report.errors.push(format!("{kind}: {e}"));
                }
            }
        }

        report.orphans.sort_by(|a, b| {
            (&a.session_id, a.kind, &a.id).cmp(&(&b.session_id, b.kind, &b.id))
        });
        report
    }

    /// Scan, then delete every orphan found
    ///
    /// Orphans are grouped by their originating session and each group is
    /// deleted as one synthetic session, with the usual tier ordering.
    pub async fn scan_and_reclaim(&self) -> CleanupResult {
        info!(
            owner = %self.config.marker.owner(),
            min_age_secs = self.config.min_age.num_seconds(),
            session_id = ?self.config.session_id,
            "Scanning for orphaned resources"
        );

        let scan = self.scan().await;
        let mut result = CleanupResult::new(SessionId::from(ORPHAN_SCAN_SESSION));
        result.scan_errors = scan.errors;

        if scan.orphans.is_empty() {
            info!("No orphaned resources found");
            return result;
        }

        let by_session: HashMap<&str, Vec<&Orphan>> =
            scan.orphans.iter().fold(HashMap::new(), |mut acc, o| {
                acc.entry(o.session_id.as_str()).or_default().push(o);
                acc
            });

        info!(
            count = scan.orphans.len(),
            sessions = by_session.len(),
            "Found orphaned resources"
        );

        for (session_id, orphans) in by_session {
            let session = Session::from_records(
                SessionId::from(session_id),
                orphans.iter().map(|o| {
                    ResourceRecord::at(o.kind, o.id.clone(), self.tiers.tier(o.kind), o.created_at)
                }),
            );
            info!(session_id = %session_id, count = session.len(), "Reclaiming orphaned session");

            let reclaimed = self.orchestrator.cleanup(&session).await;
            self.registry.record_failures(&session, &reclaimed);
            result.merge(reclaimed);
        }
        result
    }

    /// Apply ownership, age, status, session and liveness filters
    ///
    /// Handles both tagged resources and untagged ones found by name prefix.
    fn classify(&self, resource: DiscoveredResource, now: DateTime<Utc>) -> Option<Orphan> {
        let marker = &self.config.marker;
        let prefix = marker.name_prefix();
        let name = resource.name.as_deref().unwrap_or(&resource.id);

        let tagged = marker.is_owned(&resource.tags);
        let is_untagged_orphan =
            !tagged && !resource.tags.contains_key(TAG_OWNER) && name.starts_with(&prefix);
        if !tagged && !is_untagged_orphan {
            return None;
        }

        let created_at = if is_untagged_orphan {
            resource.created_at.unwrap_or(now)
        } else {
            resource
                .tags
                .get(TAG_CREATED_AT)
                .and_then(|s| tags::parse_created_at(s))
                .or(resource.created_at)
                .unwrap_or(now)
        };

        // Skip resources in grace period
        if now - created_at < self.config.min_age {
            return None;
        }

        let status = if is_untagged_orphan {
            tags::status::ORPHANED.to_string()
        } else {
            resource.tags.get(TAG_STATUS).cloned().unwrap_or_default()
        };
        if !self.config.include_creating && status == tags::status::CREATING {
            return None;
        }

        let session_id = match resource.tags.get(TAG_SESSION_ID) {
            Some(sid) => sid.clone(),
            None => name.strip_prefix(&prefix).unwrap_or("unknown").to_string(),
        };
        if let Some(filter) = &self.config.session_id {
            if filter != &session_id {
                return None;
            }
        }

        // Still owned by this process
        if self.registry.owner_of(resource.kind, &resource.id).is_some()
            || self.registry.is_live(&SessionId::from(session_id.as_str()))
        {
            return None;
        }

        Some(Orphan {
            kind: resource.kind,
            id: resource.id,
            session_id,
            created_at,
            status,
            tags: resource.tags,
        })
    }
}
