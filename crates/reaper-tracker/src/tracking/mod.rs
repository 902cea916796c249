//! Resource records, sessions and the process-wide registry

mod registry;
pub mod types;

pub use registry::Registry;
pub use types::{FailedRecord, ResourceKey, ResourceRecord, Session, SessionId};
