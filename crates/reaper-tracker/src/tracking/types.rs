//! Core types for resource tracking

use chrono::{DateTime, Utc};
use reaper_common::{ResourceKind, TierTable};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Opaque handle for one tracked session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh session id (UUIDv7, so ids sort by creation time)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a resource: unique per kind
pub type ResourceKey = (ResourceKind, String);

/// Immutable description of one created resource
///
/// Fields are private: a record never changes after it has been built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    kind: ResourceKind,
    id: String,
    dependency_tier: u8,
    registered_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Record for a resource created now, tiered by the default table
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::with_tier(kind, id, kind.default_tier())
    }

    /// Record for a resource created now, tiered by `table`
    pub fn tiered(kind: ResourceKind, id: impl Into<String>, table: &TierTable) -> Self {
        Self::with_tier(kind, id, table.tier(kind))
    }

    pub fn with_tier(kind: ResourceKind, id: impl Into<String>, dependency_tier: u8) -> Self {
        Self::at(kind, id, dependency_tier, Utc::now())
    }

    /// Record with an explicit registration time (used for discovered orphans)
    pub fn at(
        kind: ResourceKind,
        id: impl Into<String>,
        dependency_tier: u8,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            dependency_tier,
            registered_at,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependency_tier(&self) -> u8 {
        self.dependency_tier
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn key(&self) -> ResourceKey {
        (self.kind, self.id.clone())
    }

    /// Same resource with the same tier (registration time ignored)
    pub fn same_identity(&self, other: &ResourceRecord) -> bool {
        self.kind == other.kind
            && self.id == other.id
            && self.dependency_tier == other.dependency_tier
    }

    /// Get a human-readable description for logging
    pub fn description(&self) -> String {
        format!("{} {}", self.kind, self.id)
    }
}

/// Resources owned by one logical unit of work (usually one test)
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    label: Option<String>,
    started_at: DateTime<Utc>,
    records: BTreeMap<ResourceKey, ResourceRecord>,
    closed: bool,
}

impl Session {
    pub fn new(id: SessionId, label: Option<String>) -> Self {
        Self {
            id,
            label,
            started_at: Utc::now(),
            records: BTreeMap::new(),
            closed: false,
        }
    }

    /// Build a session directly from records (orphan reclaim, tests)
    pub fn from_records<I>(id: SessionId, records: I) -> Self
    where
        I: IntoIterator<Item = ResourceRecord>,
    {
        let mut session = Self::new(id, None);
        for record in records {
            session.records.insert(record.key(), record);
        }
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values()
    }

    pub fn get(&self, kind: ResourceKind, id: &str) -> Option<&ResourceRecord> {
        self.records.get(&(kind, id.to_string()))
    }

    pub fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn insert(&mut self, record: ResourceRecord) {
        self.records.insert(record.key(), record);
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }
}

/// A record that reached a terminal non-success outcome
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub session_id: SessionId,
    pub record: ResourceRecord,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}
