//! Core types for callrec-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

use crate::error::FailureKind;

/// Unique identifier for a recording, assigned by the remote telephony system
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct RecordingId(pub String);

impl RecordingId {
    /// Create a new RecordingId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordingId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordingId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RecordingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata identifying one remote recording, obtained from a listing page
///
/// Immutable once obtained. Unknown remote fields are dropped at the listing
/// boundary, not propagated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordingDescriptor {
    /// Remote-assigned unique identifier
    pub id: RecordingId,

    /// Fetch location for the audio bytes
    pub uri: String,

    /// Recording duration in seconds
    pub duration_seconds: u32,

    /// When the recording was created on the remote system
    pub created_at: DateTime<Utc>,

    /// Size declared by the remote, when known; used for integrity validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size_bytes: Option<u64>,
}

/// On-disk state of one cache entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// A write is in progress; bytes are not visible to readers
    Pending,
    /// Fully written, hashed and published
    Complete,
    /// All attempts exhausted; eligible for retry on the next run
    Failed,
}

/// On-disk state for one recording in the content store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CacheEntry {
    /// Recording identifier
    pub id: RecordingId,

    /// Entry lifecycle state
    pub status: CacheStatus,

    /// Bytes on disk (0 for failed entries)
    pub size_bytes: u64,

    /// Hex SHA-256 of the published file content (empty for failed entries)
    pub checksum: String,

    /// Absolute path of the audio file
    #[schema(value_type = String)]
    pub path: PathBuf,

    /// Content type reported by the remote during transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Final failure classification, for failed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

/// Time-window filter for an acquisition run
///
/// Both bounds are optional; the window is `[since, until)` and is applied
/// server-side by the remote listing API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AcquireFilter {
    /// Only recordings created at or after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,

    /// Only recordings created strictly before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

/// One permanently failed recording in a run report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FailedRecording {
    /// Recording identifier
    pub id: RecordingId,

    /// Final failure classification
    pub kind: FailureKind,

    /// Human-readable description of the last error
    pub message: String,
}

/// Aggregate outcome of one acquisition run; read-only after creation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RunReport {
    /// Tasks a worker began processing
    pub attempted: u64,

    /// Recordings committed to the store this run
    pub succeeded: u64,

    /// Recordings that exhausted retries or failed permanently
    pub failed: u64,

    /// Cache hits and in-flight duplicates, never dispatched to the network
    pub skipped: u64,

    /// Ids and final error kinds of all failed recordings
    pub failures: Vec<FailedRecording>,

    /// Times the listing walk restarted after remote cursor invalidation
    pub cursor_restarts: u64,

    /// Whether the run was cut short by cancellation
    pub cancelled: bool,
}

/// Coordinator state machine for one acquisition run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run active
    Idle,
    /// First page not yet enqueued
    Listing,
    /// Listing and downloading proceeding concurrently
    Dispatching,
    /// Listing finished; waiting for the queue to empty
    Draining,
    /// Run finished; report available
    Done,
}

/// Event emitted during an acquisition run
///
/// Multiple subscribers are supported via the engine's broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started with the given filter
    RunStarted {
        /// The time-window filter in effect
        filter: AcquireFilter,
    },

    /// One listing page was fetched
    PageListed {
        /// 1-based page sequence number within this walk
        page: u64,
        /// Descriptors on the page
        descriptors: usize,
    },

    /// The remote invalidated the listing cursor; the walk restarted
    CursorExpired {
        /// Restarts so far in this run
        restarts: u64,
    },

    /// A recording was skipped (already cached or owned by another writer)
    RecordingSkipped {
        /// Recording identifier
        id: RecordingId,
    },

    /// A recording was committed to the store
    RecordingComplete {
        /// Recording identifier
        id: RecordingId,
        /// Bytes written
        size_bytes: u64,
    },

    /// A recording failed permanently
    RecordingFailed {
        /// Recording identifier
        id: RecordingId,
        /// Final failure classification
        kind: FailureKind,
    },

    /// The run finished; the report is final
    RunFinished {
        /// Aggregate outcome
        report: RunReport,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_id_display_and_as_str() {
        let id = RecordingId::new("RE0123");
        assert_eq!(id.to_string(), "RE0123");
        assert_eq!(id.as_str(), "RE0123");
    }

    #[test]
    fn recording_id_serializes_transparently() {
        let id = RecordingId::new("RE0123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"RE0123\"");

        let back: RecordingId = serde_json::from_str("\"RE9\"").unwrap();
        assert_eq!(back, RecordingId::new("RE9"));
    }

    #[test]
    fn descriptor_ignores_unknown_remote_fields() {
        let json = r#"{
            "id": "RE1",
            "uri": "https://api.example.com/recordings/RE1",
            "duration_seconds": 45,
            "created_at": "2024-03-01T12:00:00Z",
            "expected_size_bytes": 360000,
            "price_unit": "USD",
            "channels": 1
        }"#;
        let d: RecordingDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.id.as_str(), "RE1");
        assert_eq!(d.duration_seconds, 45);
        assert_eq!(d.expected_size_bytes, Some(360_000));
    }

    #[test]
    fn descriptor_expected_size_is_optional() {
        let json = r#"{
            "id": "RE2",
            "uri": "https://api.example.com/recordings/RE2",
            "duration_seconds": 10,
            "created_at": "2024-03-01T12:00:00Z"
        }"#;
        let d: RecordingDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.expected_size_bytes.is_none());
    }

    #[test]
    fn cache_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CacheStatus::Complete).unwrap(),
            "\"complete\""
        );
        assert_eq!(
            serde_json::to_string(&CacheStatus::Pending).unwrap(),
            "\"pending\""
        );
    }

    #[test]
    fn run_report_default_is_empty() {
        let report = RunReport::default();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 0);
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::RecordingComplete {
            id: RecordingId::new("RE1"),
            size_bytes: 1024,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recording_complete");
        assert_eq!(json["id"], "RE1");
        assert_eq!(json["size_bytes"], 1024);
    }

    #[test]
    fn acquire_filter_round_trips() {
        let filter = AcquireFilter {
            since: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            until: None,
        };
        let json = serde_json::to_string(&filter).unwrap();
        let back: AcquireFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
        // until is omitted when None
        assert!(!json.contains("until"));
    }
}
