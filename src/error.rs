//! Error types for callrec-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Store, Remote, Config)
//! - The per-recording failure taxonomy used in run reports
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for callrec-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for callrec-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "rate_limit_per_second")
        key: Option<String>,
    },

    /// Content store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote API error (listing or recording fetch)
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording not found in the local store
    #[error("recording not found: {0}")]
    NotFound(String),

    /// An acquisition run is already active on this engine instance
    #[error("acquisition run already in progress")]
    RunInProgress,

    /// Shutdown in progress - not accepting new runs
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another write for the same recording is already active
    #[error("write already in flight for recording {id}")]
    AlreadyInFlight {
        /// The recording id with an active write
        id: String,
    },

    /// The recording is already Complete; Complete entries are never rewritten
    #[error("recording {id} is already complete")]
    AlreadyComplete {
        /// The recording id with a published entry
        id: String,
    },

    /// Transferred byte count does not match the size declared by the remote
    #[error("size mismatch for recording {id}: expected {expected} bytes, wrote {actual}")]
    SizeMismatch {
        /// The recording id whose transfer was short or long
        id: String,
        /// Bytes the descriptor declared
        expected: u64,
        /// Bytes actually written
        actual: u64,
    },

    /// Filesystem operation failed
    #[error("store I/O error for recording {id}: {source}")]
    Io {
        /// The recording id whose entry was being touched
        id: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Metadata sidecar exists but cannot be parsed
    #[error("corrupt metadata for recording {id}: {reason}")]
    CorruptMetadata {
        /// The recording id with unreadable metadata
        id: String,
        /// Why the sidecar was rejected
        reason: String,
    },
}

/// Remote API errors (listing and recording fetch)
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Timeout, connection reset, 5xx - worth retrying
    #[error("transient network failure: {0}")]
    Transient(String),

    /// HTTP 429 from the remote, with the server's Retry-After hint when present
    #[error("rate limited by remote")]
    RateLimited {
        /// Parsed Retry-After header, if the server supplied one
        retry_after: Option<Duration>,
    },

    /// 4xx other than 429 - authorization/not-found, never retried
    #[error("permanent remote failure (status {status:?}): {message}")]
    Permanent {
        /// HTTP status code when the failure came from a response
        status: Option<u16>,
        /// Human-readable description
        message: String,
    },

    /// The listing cursor was invalidated by the remote; the walk restarts
    #[error("listing cursor expired or invalidated")]
    CursorExpired,

    /// A listing item failed boundary validation (missing id/uri, bad timestamp)
    #[error("invalid recording descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Final failure classification for one recording, as recorded in a run report
///
/// This is the taxonomy the retry policy decides over: `TransientNetwork`,
/// `RateLimited`, `IntegrityFailure` and `Storage` are retryable up to the
/// attempt cap; `PermanentRemote` and `Cancelled` are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, connection reset, 5xx, or other transient network fault
    TransientNetwork,
    /// HTTP 429 from the remote
    RateLimited,
    /// 4xx other than 429 - retrying is pointless
    PermanentRemote,
    /// Checksum/size mismatch after an otherwise successful transfer
    IntegrityFailure,
    /// Local store I/O failure while writing the entry
    Storage,
    /// The run was cancelled while this recording was in flight
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::PermanentRemote => "permanent_remote",
            FailureKind::IntegrityFailure => "integrity_failure",
            FailureKind::Storage => "storage",
            FailureKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One download attempt's failure: the classification plus whatever context
/// the retry policy needs (currently the remote's Retry-After hint).
#[derive(Debug, Clone)]
pub struct DownloadFailure {
    /// Classification used by the retry policy and the run report
    pub kind: FailureKind,
    /// Server-supplied backoff hint (only for `RateLimited`)
    pub retry_after: Option<Duration>,
    /// Human-readable description for the report
    pub message: String,
}

impl DownloadFailure {
    /// Build a failure with no retry hint
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retry_after: None,
            message: message.into(),
        }
    }
}

impl From<&RemoteError> for DownloadFailure {
    fn from(err: &RemoteError) -> Self {
        match err {
            RemoteError::Transient(msg) => {
                DownloadFailure::new(FailureKind::TransientNetwork, msg.clone())
            }
            RemoteError::RateLimited { retry_after } => DownloadFailure {
                kind: FailureKind::RateLimited,
                retry_after: *retry_after,
                message: err.to_string(),
            },
            RemoteError::Permanent { .. }
            | RemoteError::CursorExpired
            | RemoteError::InvalidDescriptor(_) => {
                DownloadFailure::new(FailureKind::PermanentRemote, err.to_string())
            }
        }
    }
}

impl From<&StoreError> for DownloadFailure {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::SizeMismatch { .. } => {
                DownloadFailure::new(FailureKind::IntegrityFailure, err.to_string())
            }
            StoreError::AlreadyInFlight { .. }
            | StoreError::AlreadyComplete { .. }
            | StoreError::Io { .. }
            | StoreError::CorruptMetadata { .. } => {
                DownloadFailure::new(FailureKind::Storage, err.to_string())
            }
        }
    }
}

/// Classify a reqwest error into a `RemoteError`
///
/// Timeouts, connection-level failures and mid-body stream faults (a reset
/// while reading chunks) are transient; everything else that carries no HTTP
/// status (redirect loops, invalid requests) is treated as permanent since
/// retrying will reproduce it.
pub fn classify_reqwest(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_body() {
        RemoteError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), None, err.to_string())
    } else {
        RemoteError::Permanent {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Classify an HTTP status code into a `RemoteError`
pub fn classify_status(status: u16, retry_after: Option<Duration>, message: String) -> RemoteError {
    match status {
        429 => RemoteError::RateLimited { retry_after },
        500..=599 => RemoteError::Transient(format!("HTTP {status}: {message}")),
        _ => RemoteError::Permanent {
            status: Some(status),
            message,
        },
    }
}

/// API error response format
///
/// Returned by API endpoints when an error occurs, with machine-readable
/// error codes, human-readable messages, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "recording RE1234 not found"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create a "conflict" error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - resource busy / already in requested state
            Error::RunInProgress => 409,
            Error::Store(StoreError::AlreadyInFlight { .. }) => 409,
            Error::Store(StoreError::AlreadyComplete { .. }) => 409,

            // 422 Unprocessable Entity - semantic errors
            Error::Store(StoreError::SizeMismatch { .. }) => 422,

            // 500 Internal Server Error - server-side issues
            Error::Store(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - external service errors
            Error::Remote(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Store(e) => match e {
                StoreError::AlreadyInFlight { .. } => "already_in_flight",
                StoreError::AlreadyComplete { .. } => "already_complete",
                StoreError::SizeMismatch { .. } => "size_mismatch",
                StoreError::Io { .. } => "store_io_error",
                StoreError::CorruptMetadata { .. } => "corrupt_metadata",
            },
            Error::Remote(e) => match e {
                RemoteError::Transient(_) => "remote_transient",
                RemoteError::RateLimited { .. } => "remote_rate_limited",
                RemoteError::Permanent { .. } => "remote_permanent",
                RemoteError::CursorExpired => "cursor_expired",
                RemoteError::InvalidDescriptor(_) => "invalid_descriptor",
            },
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::RunInProgress => "run_in_progress",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Store(StoreError::SizeMismatch {
                id,
                expected,
                actual,
            }) => Some(serde_json::json!({
                "recording_id": id,
                "expected_bytes": expected,
                "actual_bytes": actual,
            })),
            Error::Store(StoreError::AlreadyInFlight { id }) => Some(serde_json::json!({
                "recording_id": id,
            })),
            Error::Remote(RemoteError::Permanent { status, .. }) => Some(serde_json::json!({
                "remote_status": status,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Helpers: construct every Error variant for status/error_code tests
    // -----------------------------------------------------------------------

    /// Returns a vec of (Error, expected_status_code, expected_error_code) for
    /// every reachable match arm in ToHttpStatus.
    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("rate_limit_per_second".into()),
                },
                400,
                "config_error",
            ),
            (Error::NotFound("recording RE1".into()), 404, "not_found"),
            (Error::RunInProgress, 409, "run_in_progress"),
            (
                Error::Store(StoreError::AlreadyInFlight { id: "RE1".into() }),
                409,
                "already_in_flight",
            ),
            (
                Error::Store(StoreError::AlreadyComplete { id: "RE1".into() }),
                409,
                "already_complete",
            ),
            (
                Error::Store(StoreError::SizeMismatch {
                    id: "RE1".into(),
                    expected: 100,
                    actual: 90,
                }),
                422,
                "size_mismatch",
            ),
            (
                Error::Store(StoreError::Io {
                    id: "RE1".into(),
                    source: std::io::Error::other("disk fail"),
                }),
                500,
                "store_io_error",
            ),
            (
                Error::Store(StoreError::CorruptMetadata {
                    id: "RE1".into(),
                    reason: "truncated json".into(),
                }),
                500,
                "corrupt_metadata",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                500,
                "io_error",
            ),
            (
                Error::ApiServerError("bind failed".into()),
                500,
                "api_server_error",
            ),
            (Error::Other("unknown".into()), 500, "internal_error"),
            (
                Error::Remote(RemoteError::Transient("reset".into())),
                502,
                "remote_transient",
            ),
            (
                Error::Remote(RemoteError::RateLimited { retry_after: None }),
                502,
                "remote_rate_limited",
            ),
            (
                Error::Remote(RemoteError::Permanent {
                    status: Some(404),
                    message: "gone".into(),
                }),
                502,
                "remote_permanent",
            ),
            (
                Error::Remote(RemoteError::CursorExpired),
                502,
                "cursor_expired",
            ),
            (
                Error::Remote(RemoteError::InvalidDescriptor("missing id".into())),
                502,
                "invalid_descriptor",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual_status = error.status_code();
            assert_eq!(
                actual_status, expected_status,
                "Error variant with error_code={expected_code} returned status {actual_status}, expected {expected_status}"
            );
        }
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual_code = error.error_code();
            assert_eq!(
                actual_code, expected_code,
                "Error variant with expected status={expected_status} returned error_code={actual_code}, expected {expected_code}"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Remote error classification
    // -----------------------------------------------------------------------

    #[test]
    fn status_429_classifies_as_rate_limited_with_hint() {
        let err = classify_status(429, Some(Duration::from_secs(7)), "slow down".into());
        match err {
            RemoteError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn status_5xx_classifies_as_transient() {
        for status in [500, 502, 503, 599] {
            let err = classify_status(status, None, "server broke".into());
            assert!(
                matches!(err, RemoteError::Transient(_)),
                "HTTP {status} should be transient, got {err:?}"
            );
        }
    }

    #[test]
    fn status_4xx_other_than_429_classifies_as_permanent() {
        for status in [400, 401, 403, 404, 410] {
            let err = classify_status(status, None, "client error".into());
            match err {
                RemoteError::Permanent { status: s, .. } => assert_eq!(s, Some(status)),
                other => panic!("HTTP {status} should be permanent, got {other:?}"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // DownloadFailure conversions
    // -----------------------------------------------------------------------

    #[test]
    fn rate_limited_remote_error_preserves_retry_after_hint() {
        let remote = RemoteError::RateLimited {
            retry_after: Some(Duration::from_millis(2500)),
        };
        let failure = DownloadFailure::from(&remote);
        assert_eq!(failure.kind, FailureKind::RateLimited);
        assert_eq!(failure.retry_after, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn size_mismatch_converts_to_integrity_failure() {
        let store = StoreError::SizeMismatch {
            id: "RE9".into(),
            expected: 100,
            actual: 90,
        };
        let failure = DownloadFailure::from(&store);
        assert_eq!(failure.kind, FailureKind::IntegrityFailure);
        assert!(failure.message.contains("RE9"));
    }

    #[test]
    fn store_io_converts_to_storage_failure() {
        let store = StoreError::Io {
            id: "RE9".into(),
            source: std::io::Error::other("disk full"),
        };
        let failure = DownloadFailure::from(&store);
        assert_eq!(failure.kind, FailureKind::Storage);
    }

    #[test]
    fn permanent_remote_error_converts_to_permanent_kind() {
        let remote = RemoteError::Permanent {
            status: Some(404),
            message: "no such recording".into(),
        };
        let failure = DownloadFailure::from(&remote);
        assert_eq!(failure.kind, FailureKind::PermanentRemote);
        assert!(failure.retry_after.is_none());
    }

    // -----------------------------------------------------------------------
    // ApiError construction and serialization
    // -----------------------------------------------------------------------

    #[test]
    fn api_error_from_size_mismatch_has_byte_counts() {
        let err = Error::Store(StoreError::SizeMismatch {
            id: "RE42".into(),
            expected: 100,
            actual: 90,
        });
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "size_mismatch");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["recording_id"], "RE42");
        assert_eq!(details["expected_bytes"], 100);
        assert_eq!(details["actual_bytes"], 90);
    }

    #[test]
    fn api_error_from_not_found_has_no_details() {
        let err = Error::NotFound("recording RE42".into());
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "not_found");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_message_matches_error_display() {
        let err = Error::RunInProgress;
        let display_msg = err.to_string();
        let api: ApiError = err.into();

        assert_eq!(api.error.message, display_msg);
    }

    #[test]
    fn api_error_without_details_omits_details_in_json() {
        let api = ApiError::new("test_code", "test message");

        let json_str = serde_json::to_string(&api).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed["error"]["code"], "test_code");
        assert_eq!(parsed["error"]["message"], "test message");
        assert!(
            parsed["error"].get("details").is_none(),
            "details field should be omitted from JSON when None"
        );
    }

    #[test]
    fn api_error_factories_produce_expected_codes() {
        assert_eq!(ApiError::not_found("recording RE1").error.code, "not_found");
        assert_eq!(ApiError::validation("bad").error.code, "validation_error");
        assert_eq!(ApiError::conflict("busy").error.code, "conflict");
        assert_eq!(ApiError::internal("boom").error.code, "internal_error");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::TransientNetwork).unwrap();
        assert_eq!(json, "\"transient_network\"");
        let back: FailureKind = serde_json::from_str("\"integrity_failure\"").unwrap();
        assert_eq!(back, FailureKind::IntegrityFailure);
    }
}
