//! Default configuration values
//!
//! These constants keep the tracker config, the orchestrator and the tests
//! in agreement about timeouts and retry budgets.

/// Default maximum delete attempts per resource (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default initial retry backoff in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single retry backoff in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Default per-resource state-wait budget in seconds
pub const DEFAULT_STATE_WAIT_TIMEOUT_SECS: u64 = 30;

/// Default initial state poll delay in milliseconds
pub const DEFAULT_STATE_POLL_INITIAL_MS: u64 = 500;

/// Default cap on the state poll delay in milliseconds
pub const DEFAULT_STATE_POLL_MAX_MS: u64 = 5_000;

/// Default global deadline for an emergency sweep in seconds
pub const DEFAULT_SHUTDOWN_DEADLINE_SECS: u64 = 120;

/// Default number of concurrent deletes within one tier
pub const DEFAULT_MAX_CONCURRENT_DELETES: usize = 8;

/// Default grace period before an untracked resource counts as an orphan
pub const DEFAULT_ORPHAN_MIN_AGE_SECS: u64 = 600;

// Serde default functions for struct field defaults

/// Returns the default max attempts
pub fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Returns the default base delay
pub fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

/// Returns the default max delay
pub fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

/// Returns the default state-wait timeout
pub fn default_state_wait_timeout_secs() -> u64 {
    DEFAULT_STATE_WAIT_TIMEOUT_SECS
}

/// Returns the default initial poll delay
pub fn default_state_poll_initial_ms() -> u64 {
    DEFAULT_STATE_POLL_INITIAL_MS
}

/// Returns the default max poll delay
pub fn default_state_poll_max_ms() -> u64 {
    DEFAULT_STATE_POLL_MAX_MS
}

/// Returns the default shutdown deadline
pub fn default_shutdown_deadline_secs() -> u64 {
    DEFAULT_SHUTDOWN_DEADLINE_SECS
}

/// Returns the default delete concurrency
pub fn default_max_concurrent_deletes() -> usize {
    DEFAULT_MAX_CONCURRENT_DELETES
}

/// Returns the default orphan grace period
pub fn default_orphan_min_age_secs() -> u64 {
    DEFAULT_ORPHAN_MIN_AGE_SECS
}

/// Returns the default owner tag value
pub fn default_owner() -> String {
    crate::tags::DEFAULT_OWNER.to_string()
}

/// Returns true (serde default helper)
pub fn default_true() -> bool {
    true
}
