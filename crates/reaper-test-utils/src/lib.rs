//! Shared test utilities for reaper
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`fake`]: Scripted in-memory deletion adapter and shared call log
//! - [`session`]: Unique session labels and test tracing setup

pub mod fake;
pub mod session;

// Re-export commonly used items
pub use fake::{Call, CallLog, FakeAdapter, Op, tagged_resource};
pub use session::{init_test_tracing, test_session_label};
