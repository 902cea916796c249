//! reaper-tracker - Resource lifecycle tracker
//!
//! Guarantees that resources created by short-lived sessions (usually
//! integration tests) are deleted, in dependency order, even when the
//! process is interrupted, panics, or died during an earlier run.
//!
//! ## Modules
//!
//! - [`tracking`]: Sessions, resource records and the process registry
//! - [`orchestrator`]: Tiered deletion with state waits and retries
//! - [`emergency`]: Sweeps every live session on shutdown triggers
//! - [`scanner`]: Reclaims orphans left by earlier processes
//! - [`session`]: Scoped session wrappers and guards
//! - [`tracker`]: Process bootstrap wiring it all together

pub mod adapter;
pub mod config;
pub mod emergency;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod result;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod tracker;
pub mod tracking;
pub mod wait;

pub use adapter::{AdapterSet, DeleteOutcome, DeletionAdapter, Described, DiscoveredResource, ResourceState};
pub use config::{ConfigError, TrackerConfig};
pub use emergency::{EmergencyCoordinator, EmergencyReport, ShutdownTrigger};
pub use error::{AdapterError, TrackerError};
pub use orchestrator::CleanupOrchestrator;
pub use report::{CleanupReporter, JsonReporter, TracingReporter};
pub use result::{CleanupResult, CleanupSummary, ResourceOutcome, ResourceReport, SkipReason};
pub use retry::RetryPolicy;
pub use scanner::{Orphan, OrphanScanner, ScanConfig, ScanReport};
pub use session::{SessionGuard, SessionManager};
pub use tracker::Tracker;
pub use tracking::{FailedRecord, Registry, ResourceRecord, Session, SessionId};
pub use wait::WaitConfig;

pub use reaper_common::{OwnershipMarker, ResourceKind, TierTable};
