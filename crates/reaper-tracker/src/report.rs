//! Reporting sinks for cleanup results

use crate::result::CleanupResult;
use std::io::Write;
use std::sync::Mutex;
use tracing::{info, warn};

/// Receives every finished [`CleanupResult`]
pub trait CleanupReporter: Send + Sync {
    fn report(&self, result: &CleanupResult);
}

/// Emits one structured log line per result and one per unsuccessful resource
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl CleanupReporter for TracingReporter {
    fn report(&self, result: &CleanupResult) {
        let summary = result.summary();
        info!(
            session_id = %result.session_id,
            total = summary.total,
            deleted = summary.deleted,
            not_found = summary.not_found,
            failed = summary.failed,
            skipped = summary.skipped,
            "Cleanup result"
        );
        for report in result.unsuccessful() {
            warn!(
                session_id = %result.session_id,
                kind = %report.kind,
                id = %report.id,
                tier = report.tier,
                attempts = report.attempts,
                outcome = %report.outcome,
                "Resource not cleaned up"
            );
        }
        for error in &result.scan_errors {
            warn!(session_id = %result.session_id, error = %error, "Scan error");
        }
    }
}

/// Writes each result as one line of JSON
pub struct JsonReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> CleanupReporter for JsonReporter<W> {
    fn report(&self, result: &CleanupResult) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *out, result)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(out))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            warn!(session_id = %result.session_id, error = %e, "Failed to write cleanup report");
        }
    }
}
