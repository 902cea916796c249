//! Tracker configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration. Validation is done via `garde::Validate`.

use crate::retry::RetryPolicy;
use crate::scanner::ScanConfig;
use crate::wait::WaitConfig;
use reaper_common::defaults::{
    default_base_delay_ms, default_max_attempts, default_max_concurrent_deletes,
    default_max_delay_ms, default_orphan_min_age_secs, default_owner,
    default_shutdown_deadline_secs, default_state_poll_initial_ms, default_state_poll_max_ms,
    default_state_wait_timeout_secs, default_true,
};
use reaper_common::{OwnershipMarker, ResourceKind, TierTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an optional JSON config file
pub const CONFIG_ENV: &str = "REAPER_CONFIG";

/// Errors from loading or validating a [`TrackerConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration for the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Delete attempts per resource, first try included (default: 4)
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 20))]
    pub max_attempts: u32,

    /// First retry backoff in milliseconds (default: 500)
    #[serde(default = "default_base_delay_ms")]
    #[garde(range(min = 1))]
    pub base_delay_ms: u64,

    /// Cap on a single retry backoff in milliseconds (default: 8000)
    #[serde(default = "default_max_delay_ms")]
    #[garde(range(min = 1))]
    pub max_delay_ms: u64,

    /// Add random jitter to retry backoffs (default: true)
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub jitter: bool,

    /// Per-resource budget for reaching a deletable state (default: 30)
    #[serde(default = "default_state_wait_timeout_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub state_wait_timeout_secs: u64,

    /// First state poll delay in milliseconds (default: 500)
    #[serde(default = "default_state_poll_initial_ms")]
    #[garde(range(min = 1))]
    pub state_poll_initial_ms: u64,

    /// Cap on the state poll delay in milliseconds (default: 5000)
    #[serde(default = "default_state_poll_max_ms")]
    #[garde(range(min = 1))]
    pub state_poll_max_ms: u64,

    /// Deadline for a whole emergency sweep in seconds (default: 120)
    #[serde(default = "default_shutdown_deadline_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub shutdown_deadline_secs: u64,

    /// Concurrent deletes within one tier (default: 8)
    #[serde(default = "default_max_concurrent_deletes")]
    #[garde(range(min = 1, max = 256))]
    pub max_concurrent_deletes: usize,

    /// Grace period before an untracked resource is reclaimed (default: 600, at most 30 days)
    #[serde(default = "default_orphan_min_age_secs")]
    #[garde(range(max = 2_592_000))]
    pub orphan_min_age_secs: u64,

    /// Reclaim orphans still tagged as "creating" (default: false)
    #[serde(default)]
    #[garde(skip)]
    pub include_creating: bool,

    /// Owner tag value and name prefix (default: "reaper")
    #[serde(default = "default_owner")]
    #[garde(length(min = 1, max = 64))]
    pub owner: String,

    /// Per-kind tier overrides on top of the default table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[garde(skip)]
    pub tier_overrides: BTreeMap<ResourceKind, u8>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_true(),
            state_wait_timeout_secs: default_state_wait_timeout_secs(),
            state_poll_initial_ms: default_state_poll_initial_ms(),
            state_poll_max_ms: default_state_poll_max_ms(),
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
            max_concurrent_deletes: default_max_concurrent_deletes(),
            orphan_min_age_secs: default_orphan_min_age_secs(),
            include_creating: false,
            owner: default_owner(),
            tier_overrides: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Load from the file named by `REAPER_CONFIG`, or use defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Field validation plus the checks that span several fields
    pub fn check(&self) -> Result<(), ConfigError> {
        garde::Validate::validate(self).map_err(|report| ConfigError::Invalid(report.to_string()))?;

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.state_poll_initial_ms > self.state_poll_max_ms {
            return Err(ConfigError::Invalid(format!(
                "state_poll_initial_ms ({}) exceeds state_poll_max_ms ({})",
                self.state_poll_initial_ms, self.state_poll_max_ms
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }

    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(self.state_poll_initial_ms),
            max_delay: Duration::from_millis(self.state_poll_max_ms),
            timeout: Duration::from_secs(self.state_wait_timeout_secs),
        }
    }

    pub fn marker(&self) -> OwnershipMarker {
        OwnershipMarker::new(self.owner.clone())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            min_age: chrono::Duration::seconds(self.orphan_min_age_secs.min(2_592_000) as i64),
            session_id: None,
            include_creating: self.include_creating,
            marker: self.marker(),
        }
    }

    pub fn tier_table(&self) -> TierTable {
        TierTable::with_overrides(self.tier_overrides.iter().map(|(k, t)| (*k, *t)))
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}
