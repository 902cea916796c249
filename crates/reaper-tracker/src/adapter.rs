//! Deletion adapter seam
//!
//! The tracker never calls a provider API itself. Each resource kind gets an
//! adapter, supplied by the layer that creates resources, which knows how to
//! describe, delete and list resources of that kind.

use crate::error::AdapterError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reaper_common::{OwnershipMarker, ResourceKind};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Provider-reported lifecycle state of a resource (e.g. "ACTIVE", "UPDATING")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceState(String);

impl ResourceState {
    pub fn new(state: impl Into<String>) -> Self {
        Self(state.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Provider accepted the deletion
    Deleted,
    /// Resource did not exist
    NotFound,
}

/// Result of describing a resource before deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Described {
    State(ResourceState),
    NotFound,
}

/// A resource found by listing the provider, before any filtering
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
    pub kind: ResourceKind,
    pub id: String,
    /// Provider-side name, used for the name-prefix fallback
    pub name: Option<String>,
    /// All tags on the resource (empty if it could not be tagged)
    pub tags: BTreeMap<String, String>,
    /// Provider-reported creation time, used when tags are missing
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-kind collaborator that performs deletions against the provider
#[async_trait]
pub trait DeletionAdapter: Send + Sync {
    /// Kind handled by this adapter
    fn kind(&self) -> ResourceKind;

    /// Current state of a resource
    async fn describe_state(&self, id: &str) -> Result<Described, AdapterError>;

    /// Whether a resource in `state` can be deleted now
    fn is_deletable(&self, state: &ResourceState) -> bool;

    /// Delete a resource
    async fn delete(&self, id: &str) -> Result<DeleteOutcome, AdapterError>;

    /// List resources carrying `marker` (or its name prefix)
    ///
    /// Kinds that cannot be enumerated keep the default, which finds nothing.
    async fn list_owned(&self, _marker: &OwnershipMarker) -> Result<Vec<DiscoveredResource>, AdapterError> {
        Ok(Vec::new())
    }
}

/// Adapters indexed by the kind they handle
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<ResourceKind, Arc<dyn DeletionAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any previous one for the same kind
    pub fn with(mut self, adapter: Arc<dyn DeletionAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn DeletionAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn DeletionAdapter>> {
        self.adapters.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DeletionAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl FromIterator<Arc<dyn DeletionAdapter>> for AdapterSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn DeletionAdapter>>>(iter: I) -> Self {
        let mut set = Self::new();
        for adapter in iter {
            set.insert(adapter);
        }
        set
    }
}
