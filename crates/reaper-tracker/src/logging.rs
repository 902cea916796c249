//! Tracing subscriber setup

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_level`
///
/// Returns `false` if a global subscriber was already set (in which case
/// nothing changes).
pub fn init_tracing(default_level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .try_init()
        .is_ok()
}
