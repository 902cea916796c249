//! reaper-common - Shared types for the reaper resource tracker
//!
//! This crate holds the pieces shared by the tracker and the adapter layers
//! that create resources, without any async runtime dependency.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`resource_kind`]: Resource kinds and the dependency tier table
//! - [`tags`]: Ownership tag schema for discovery and orphan cleanup

pub mod defaults;
pub mod resource_kind;
pub mod tags;

// Re-export commonly used types
pub use resource_kind::{ResourceKind, TierTable, UnknownKind};
pub use tags::OwnershipMarker;
