//! Cleanup outcomes
//!
//! The orchestrator never raises for a cleanup failure; everything that
//! happened to every resource is returned as data in a [`CleanupResult`].

use crate::tracking::{ResourceRecord, SessionId};
use reaper_common::ResourceKind;
use serde::Serialize;
use std::fmt;

/// Why a resource was not attempted (or not finished)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Global sweep deadline passed before the resource finished
    Timeout,
    /// Resource never became deletable within the state-wait budget
    StateWaitTimeout,
    /// No deletion adapter is registered for the resource's kind
    NoAdapter,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Timeout => "timeout",
            SkipReason::StateWaitTimeout => "state wait timeout",
            SkipReason::NoAdapter => "no adapter",
        })
    }
}

/// Terminal outcome for a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// Resource was deleted by this pass
    Deleted,
    /// Resource was already gone (counts as success)
    NotFound,
    /// Deletion failed (terminal error or retries exhausted)
    Failed(String),
    /// Resource was not attempted or not finished
    Skipped(SkipReason),
}

impl ResourceOutcome {
    /// Deleted or already gone
    pub fn is_success(&self) -> bool {
        matches!(self, ResourceOutcome::Deleted | ResourceOutcome::NotFound)
    }
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceOutcome::Deleted => f.write_str("deleted"),
            ResourceOutcome::NotFound => f.write_str("not_found"),
            ResourceOutcome::Failed(reason) => write!(f, "failed({reason})"),
            ResourceOutcome::Skipped(reason) => write!(f, "skipped({reason})"),
        }
    }
}

/// What happened to one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub id: String,
    pub tier: u8,
    pub outcome: ResourceOutcome,
    /// Delete calls started, including one cut off by a deadline
    pub attempts: u32,
}

impl ResourceReport {
    pub fn new(record: &ResourceRecord, outcome: ResourceOutcome, attempts: u32) -> Self {
        Self {
            kind: record.kind(),
            id: record.id().to_string(),
            tier: record.dependency_tier(),
            outcome,
            attempts,
        }
    }
}

/// Per-outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub total: usize,
    pub deleted: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Aggregated outcome of a deletion pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub session_id: SessionId,
    pub reports: Vec<ResourceReport>,
    /// Discovery problems (orphan scans only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scan_errors: Vec<String>,
}

impl CleanupResult {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            reports: Vec::new(),
            scan_errors: Vec::new(),
        }
    }

    pub fn push(&mut self, report: ResourceReport) {
        self.reports.push(report);
    }

    /// Fold another result into this one (reports and scan errors)
    pub fn merge(&mut self, other: CleanupResult) {
        self.reports.extend(other.reports);
        self.scan_errors.extend(other.scan_errors);
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty() && self.scan_errors.is_empty()
    }

    /// Every resource deleted or already gone, and nothing went wrong scanning
    pub fn is_success(&self) -> bool {
        self.scan_errors.is_empty() && self.reports.iter().all(|r| r.outcome.is_success())
    }

    /// Reports with a `Failed` outcome
    pub fn failures(&self) -> Vec<&ResourceReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Failed(_)))
            .collect()
    }

    /// Reports that are neither deleted nor not-found
    pub fn unsuccessful(&self) -> impl Iterator<Item = &ResourceReport> {
        self.reports.iter().filter(|r| !r.outcome.is_success())
    }

    /// Outcome for a given resource, if it was part of this pass
    pub fn outcome_of(&self, kind: ResourceKind, id: &str) -> Option<&ResourceOutcome> {
        self.reports
            .iter()
            .find(|r| r.kind == kind && r.id == id)
            .map(|r| &r.outcome)
    }

    pub fn summary(&self) -> CleanupSummary {
        self.reports
            .iter()
            .fold(CleanupSummary::default(), |mut acc, report| {
                acc.total += 1;
                match report.outcome {
                    ResourceOutcome::Deleted => acc.deleted += 1,
                    ResourceOutcome::NotFound => acc.not_found += 1,
                    ResourceOutcome::Failed(_) => acc.failed += 1,
                    ResourceOutcome::Skipped(_) => acc.skipped += 1,
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, outcome: ResourceOutcome) -> ResourceReport {
        ResourceReport::new(&ResourceRecord::new(ResourceKind::Asset, id), outcome, 1)
    }

    #[test]
    fn test_summary_counts() {
        let mut result = CleanupResult::new("s1".into());
        result.push(report("a1", ResourceOutcome::Deleted));
        result.push(report("a2", ResourceOutcome::NotFound));
        result.push(report("a3", ResourceOutcome::Failed("denied".into())));
        result.push(report("a4", ResourceOutcome::Skipped(SkipReason::Timeout)));

        assert_eq!(
            result.summary(),
            CleanupSummary {
                total: 4,
                deleted: 1,
                not_found: 1,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.unsuccessful().count(), 2);
        assert!(!result.is_success());
    }

    #[test]
    fn test_not_found_counts_as_success() {
        let mut result = CleanupResult::new("s1".into());
        result.push(report("a1", ResourceOutcome::NotFound));
        assert!(result.is_success());
        assert_eq!(
            result.outcome_of(ResourceKind::Asset, "a1"),
            Some(&ResourceOutcome::NotFound)
        );
    }

    #[test]
    fn test_merge_keeps_scan_errors() {
        let mut a = CleanupResult::new("s1".into());
        let mut b = CleanupResult::new("s2".into());
        b.push(report("a1", ResourceOutcome::Deleted));
        b.scan_errors.push("gateway: access denied".into());

        a.merge(b);
        assert_eq!(a.reports.len(), 1);
        assert!(!a.is_success());
        assert!(!a.is_empty());
    }

    #[test]
    fn test_outcome_display_and_json() {
        assert_eq!(
            ResourceOutcome::Failed("in use".into()).to_string(),
            "failed(in use)"
        );
        assert_eq!(
            ResourceOutcome::Skipped(SkipReason::Timeout).to_string(),
            "skipped(timeout)"
        );

        let json = serde_json::to_value(ResourceOutcome::Skipped(SkipReason::NoAdapter)).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "skipped", "reason": "no_adapter"}));
    }
}
