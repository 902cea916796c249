//! Error types and provider error classification
//!
//! Two families of errors live here:
//!
//! - [`TrackerError`]: caller misuse (duplicate registration, unknown or
//!   closed session). Raised synchronously.
//! - [`AdapterError`]: what a deletion adapter reports back. Classified from
//!   provider error codes so the orchestrator can decide between retrying,
//!   treating the resource as gone, or giving up.

use reaper_common::ResourceKind;
use thiserror::Error;

/// Caller-facing errors from the registry and session scopes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// `(kind, id)` conflicts with an existing registration
    #[error("Resource {kind} '{id}' already registered: {detail}")]
    DuplicateResource {
        kind: ResourceKind,
        id: String,
        detail: String,
    },

    /// Session id is not (or no longer) live
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Session's deletion pass has started; it accepts no new resources
    #[error("Session {0} is closed for registration")]
    SessionClosed(String),

    /// An operator interrupt ended the host before it finished
    #[error("Interrupted by shutdown signal")]
    Interrupted,
}

/// Errors reported by deletion adapters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Resource does not exist (already deleted)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is referenced or mid-transition (retryable)
    #[error("Resource in use: {0}")]
    InUse(String),

    /// Transport-level failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Provider-side outage or internal failure (retryable)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Caller lacks permission (terminal)
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Identifier is malformed or refers to the wrong kind (terminal)
    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    /// Anything else the provider returned
    #[error("Provider error: {message}")]
    Provider {
        code: Option<String>,
        message: String,
    },
}

impl AdapterError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Throttled
                | AdapterError::InUse(_)
                | AdapterError::Network(_)
                | AdapterError::ServiceUnavailable(_)
        )
    }
}

/// Provider error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "ResourceNotFound", "NotFound"];

/// Provider error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Provider error codes for resources still referenced or transitioning
const IN_USE_CODES: &[&str] = &[
    "ConflictingOperationException",
    "ResourceInUseException",
    "DependencyViolation",
];

/// Provider error codes for provider-side failures
const UNAVAILABLE_CODES: &[&str] = &["InternalFailureException", "ServiceUnavailableException"];

/// Provider error codes for transport timeouts
const NETWORK_CODES: &[&str] = &["RequestTimeout", "RequestTimeoutException"];

/// Provider error codes for permission problems
const ACCESS_DENIED_CODES: &[&str] = &["AccessDeniedException", "UnauthorizedException"];

/// Provider error codes for malformed identifiers
const INVALID_ID_CODES: &[&str] = &["InvalidRequestException", "ValidationException"];

/// Classify a provider error using its error code.
///
/// Adapters call this with whatever code/message their SDK exposes so that
/// every adapter maps provider failures the same way.
pub fn classify_error_code(code: Option<&str>, message: Option<&str>) -> AdapterError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AdapterError::NotFound(message),
        Some(c) if THROTTLING_CODES.contains(&c) => AdapterError::Throttled,
        Some(c) if IN_USE_CODES.contains(&c) => AdapterError::InUse(message),
        Some(c) if UNAVAILABLE_CODES.contains(&c) => AdapterError::ServiceUnavailable(message),
        Some(c) if NETWORK_CODES.contains(&c) => AdapterError::Network(message),
        Some(c) if ACCESS_DENIED_CODES.contains(&c) => AdapterError::AccessDenied(message),
        Some(c) if INVALID_ID_CODES.contains(&c) => AdapterError::InvalidId(message),
        None if looks_like_transport_failure(&message) => AdapterError::Network(message),
        _ => AdapterError::Provider {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Codeless failures that come from the transport rather than the provider
fn looks_like_transport_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["connection", "dispatch failure", "timed out", "dns error"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_error_code(Some(code), Some("gone"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn transient_codes_are_retryable() {
        for code in THROTTLING_CODES
            .iter()
            .chain(IN_USE_CODES)
            .chain(UNAVAILABLE_CODES)
            .chain(NETWORK_CODES)
        {
            let err = classify_error_code(Some(code), Some("msg"));
            assert!(err.is_retryable(), "Expected retryable for code: {code}");
        }
    }

    #[test]
    fn terminal_codes_are_not_retryable() {
        for code in ACCESS_DENIED_CODES.iter().chain(INVALID_ID_CODES) {
            let err = classify_error_code(Some(code), Some("msg"));
            assert!(!err.is_retryable(), "Expected terminal for code: {code}");
            assert!(!err.is_not_found());
        }
    }

    #[test]
    fn conflicting_operation_is_in_use() {
        let err = classify_error_code(
            Some("ConflictingOperationException"),
            Some("asset is being updated"),
        );
        assert_eq!(err, AdapterError::InUse("asset is being updated".into()));
    }

    #[test]
    fn codeless_transport_failure() {
        let err = classify_error_code(None, Some("Connection reset by peer"));
        assert!(matches!(err, AdapterError::Network(_)));
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_error_code(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AdapterError::Provider { code: Some(_), .. }));
        assert!(!err.is_retryable());

        let err2 = classify_error_code(None, Some("something failed"));
        assert!(matches!(err2, AdapterError::Provider { code: None, .. }));
    }

    #[test]
    fn tracker_error_messages() {
        let err = TrackerError::DuplicateResource {
            kind: ResourceKind::Asset,
            id: "a1".into(),
            detail: "owned by session s2".into(),
        };
        assert_eq!(
            err.to_string(),
            "Resource asset 'a1' already registered: owned by session s2"
        );
        assert_eq!(
            TrackerError::UnknownSession("s9".into()).to_string(),
            "Unknown session: s9"
        );
    }
}
