//! Ownership tag schema for tracker-created resources
//!
//! Every resource created under a tracked session is tagged at creation time
//! so that a later process can find it again, even if the creating process
//! died before any cleanup path ran.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `reaper:owner` | Owner identifier (defaults to "reaper") |
//! | `reaper:session-id` | Session that created the resource |
//! | `reaper:created-at` | RFC 3339 creation timestamp |
//! | `reaper:status` | Lifecycle status (creating/active) |
//!
//! Resources that cannot carry tags are instead named with the owner prefix
//! (see [`name_prefix`]).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Tag key for owner identification - all tracked resources have this
pub const TAG_OWNER: &str = "reaper:owner";

/// Default owner value
pub const DEFAULT_OWNER: &str = "reaper";

/// Tag key for the owning session
pub const TAG_SESSION_ID: &str = "reaper:session-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "reaper:created-at";

/// Tag key for resource lifecycle status
pub const TAG_STATUS: &str = "reaper:status";

/// Resource lifecycle status values
pub mod status {
    /// Resource is being created - not yet fully initialized
    pub const CREATING: &str = "creating";

    /// Resource is active and in use
    pub const ACTIVE: &str = "active";

    /// Untagged resource found by name prefix
    pub const ORPHANED: &str = "orphaned";
}

/// Owner marker applied to every tracked resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipMarker {
    owner: String,
}

impl Default for OwnershipMarker {
    fn default() -> Self {
        Self::new(DEFAULT_OWNER)
    }
}

impl OwnershipMarker {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Name prefix for resources that cannot be tagged
    pub fn name_prefix(&self) -> String {
        name_prefix(&self.owner)
    }

    /// Check whether a tag map carries this owner
    pub fn is_owned(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(TAG_OWNER).map(String::as_str) == Some(self.owner.as_str())
    }

    /// Tags to attach to a resource at creation time
    ///
    /// The status is `active`: the resource is registered as soon as its
    /// create call succeeds, so once tagged it is a complete, reclaimable
    /// resource.
    pub fn tags_for(&self, session_id: &str, created_at: DateTime<Utc>) -> BTreeMap<String, String> {
        self.tags_with_status(session_id, created_at, status::ACTIVE)
    }

    /// Tags with an explicit lifecycle status
    ///
    /// For providers that create in two steps: tag with
    /// [`status::CREATING`] first and retag `active` once the second step
    /// succeeds.
    pub fn tags_with_status(
        &self,
        session_id: &str,
        created_at: DateTime<Utc>,
        status: &str,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TAG_OWNER.to_string(), self.owner.clone()),
            (TAG_SESSION_ID.to_string(), session_id.to_string()),
            (TAG_CREATED_AT.to_string(), format_created_at(created_at)),
            (TAG_STATUS.to_string(), status.to_string()),
        ])
    }
}

/// Name prefix convention for untaggable resources (`{owner}-`)
pub fn name_prefix(owner: &str) -> String {
    format!("{owner}-")
}

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
