//! Resource kinds and dependency tiers
//!
//! Resources must be deleted in dependency order: anything that references
//! another resource goes first, and whatever is referenced goes last. The
//! order is an explicit table ([`TierTable`]) rather than a naming convention,
//! so a new kind needs exactly one table entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kinds of resources the tracker knows how to tear down
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Parent/child link between two assets
    Association,
    /// Dashboard inside a project
    Dashboard,
    /// Portal project grouping dashboards
    Project,
    /// Access policy granting an identity access to a portal or project
    AccessPolicy,
    /// Time series (may be bound to an asset property)
    TimeSeries,
    /// Asset built from an asset model
    Asset,
    /// Edge gateway
    Gateway,
    /// Asset model (referenced by every asset built from it)
    AssetModel,
}

impl ResourceKind {
    /// Every kind, in default deletion order
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Association,
        ResourceKind::Dashboard,
        ResourceKind::Project,
        ResourceKind::AccessPolicy,
        ResourceKind::TimeSeries,
        ResourceKind::Asset,
        ResourceKind::Gateway,
        ResourceKind::AssetModel,
    ];

    /// Default dependency tier (lower number = delete first)
    ///
    /// - 0: associations (reference two assets)
    /// - 1: dashboards (live inside projects)
    /// - 2: projects
    /// - 3: access policies
    /// - 4: time series (may be bound to asset properties)
    /// - 5: assets
    /// - 6: gateways
    /// - 7: asset models (referenced by assets, so always last)
    pub fn default_tier(self) -> u8 {
        match self {
            ResourceKind::Association => 0,
            ResourceKind::Dashboard => 1,
            ResourceKind::Project => 2,
            ResourceKind::AccessPolicy => 3,
            ResourceKind::TimeSeries => 4,
            ResourceKind::Asset => 5,
            ResourceKind::Gateway => 6,
            ResourceKind::AssetModel => 7,
        }
    }

    /// Stable string form, used in tags, logs and config files
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Association => "association",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Project => "project",
            ResourceKind::AccessPolicy => "access_policy",
            ResourceKind::TimeSeries => "time_series",
            ResourceKind::Asset => "asset",
            ResourceKind::Gateway => "gateway",
            ResourceKind::AssetModel => "asset_model",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown resource kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Mapping from resource kind to dependency tier
///
/// Starts from [`ResourceKind::default_tier`] and accepts per-kind overrides
/// (usually from configuration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: BTreeMap<ResourceKind, u8>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: ResourceKind::ALL
                .into_iter()
                .map(|k| (k, k.default_tier()))
                .collect(),
        }
    }
}

impl TierTable {
    /// Default table with the given overrides applied on top
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, u8)>,
    {
        let mut table = Self::default();
        table.tiers.extend(overrides);
        table
    }

    /// Tier for a kind
    pub fn tier(&self, kind: ResourceKind) -> u8 {
        self.tiers
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_tier())
    }

    /// Override the tier for a single kind
    pub fn set(&mut self, kind: ResourceKind, tier: u8) {
        self.tiers.insert(kind, tier);
    }

    /// Kinds sorted by deletion order (ties broken by kind order)
    pub fn deletion_order(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.tiers.keys().copied().collect();
        kinds.sort_by_key(|k| (self.tier(*k), *k));
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_associations_before_assets() {
        assert!(
            ResourceKind::Association.default_tier() < ResourceKind::Asset.default_tier(),
            "Associations must be removed before the assets they link"
        );
    }

    #[test]
    fn test_models_last() {
        for kind in ResourceKind::ALL {
            assert!(kind.default_tier() <= ResourceKind::AssetModel.default_tier());
        }
    }

    #[test]
    fn test_tier_values() {
        assert_eq!(ResourceKind::Association.default_tier(), 0);
        assert_eq!(ResourceKind::Dashboard.default_tier(), 1);
        assert_eq!(ResourceKind::Project.default_tier(), 2);
        assert_eq!(ResourceKind::AccessPolicy.default_tier(), 3);
        assert_eq!(ResourceKind::TimeSeries.default_tier(), 4);
        assert_eq!(ResourceKind::Asset.default_tier(), 5);
        assert_eq!(ResourceKind::Gateway.default_tier(), 6);
        assert_eq!(ResourceKind::AssetModel.default_tier(), 7);
    }

    #[test]
    fn test_parse_and_display() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert_eq!(
            "bucket".parse::<ResourceKind>(),
            Err(UnknownKind("bucket".to_string()))
        );
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ResourceKind::AccessPolicy).unwrap();
        assert_eq!(json, "\"access_policy\"");
    }

    #[test]
    fn test_tier_table_overrides() {
        let table = TierTable::with_overrides([(ResourceKind::Gateway, 0)]);
        assert_eq!(table.tier(ResourceKind::Gateway), 0);
        assert_eq!(table.tier(ResourceKind::Asset), 5);
        assert_eq!(table.deletion_order()[0], ResourceKind::Association);
        assert_eq!(table.deletion_order()[1], ResourceKind::Gateway);
    }

    #[test]
    fn test_default_deletion_order_matches_all() {
        assert_eq!(TierTable::default().deletion_order(), ResourceKind::ALL.to_vec());
    }
}
