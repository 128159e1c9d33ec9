//! Scripted in-process remote for unit tests
//!
//! Listing responses are consumed in push order; per-recording download
//! behavior (bytes, fault injection, pacing) is scripted per uri.

use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::RemoteError;
use crate::remote::{ListRequest, ListingPage, RemoteApi, RemoteDownload};
use crate::types::{RecordingDescriptor, RecordingId};

/// Download behavior for one scripted recording
pub(crate) struct RecordingScript {
    /// Bytes actually delivered
    pub bytes: Vec<u8>,
    /// Content-Type reported to the worker
    pub content_type: Option<String>,
    /// Declared Content-Length (defaults to the delivered byte count)
    pub declared_length: Option<u64>,
    /// Fail this many open attempts with a transient error before succeeding
    pub fail_first: u32,
    /// Pause before each chunk, for cancellation/timeout tests
    pub chunk_delay: Option<Duration>,
}

impl Default for RecordingScript {
    fn default() -> Self {
        Self {
            bytes: b"scripted audio payload".to_vec(),
            content_type: Some("audio/wav".to_string()),
            declared_length: None,
            fail_first: 0,
            chunk_delay: None,
        }
    }
}

/// Scripted [`RemoteApi`] implementation
#[derive(Default)]
pub(crate) struct MockRemote {
    list_script: Mutex<VecDeque<Result<ListingPage, RemoteError>>>,
    cursors_seen: Mutex<Vec<Option<String>>>,
    list_call_count: Mutex<u32>,
    recordings: Mutex<HashMap<String, RecordingScript>>,
    open_counts: Mutex<HashMap<String, u32>>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a successful listing page
    pub(crate) fn push_list_page(&self, page: ListingPage) {
        self.list_script.lock().unwrap().push_back(Ok(page));
    }

    /// Queue a listing failure
    pub(crate) fn push_list_error(&self, error: RemoteError) {
        self.list_script.lock().unwrap().push_back(Err(error));
    }

    /// Script the download behavior for a uri
    pub(crate) fn set_recording(&self, uri: impl Into<String>, script: RecordingScript) {
        self.recordings.lock().unwrap().insert(uri.into(), script);
    }

    /// Script plain bytes for the standard uri of descriptor `i`
    pub(crate) fn install_recording(&self, i: u32, bytes: Vec<u8>) {
        self.set_recording(
            descriptor_n(i).uri,
            RecordingScript {
                bytes,
                ..RecordingScript::default()
            },
        );
    }

    /// Cursors passed to list_page, in call order
    pub(crate) fn cursors_seen(&self) -> Vec<Option<String>> {
        self.cursors_seen.lock().unwrap().clone()
    }

    /// Total list_page calls
    pub(crate) fn list_calls(&self) -> u32 {
        *self.list_call_count.lock().unwrap()
    }

    /// Times a uri was opened for download
    pub(crate) fn open_calls(&self, uri: &str) -> u32 {
        self.open_counts.lock().unwrap().get(uri).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl RemoteApi for MockRemote {
    async fn list_page(&self, request: ListRequest<'_>) -> Result<ListingPage, RemoteError> {
        *self.list_call_count.lock().unwrap() += 1;
        self.cursors_seen
            .lock()
            .unwrap()
            .push(request.cursor.map(String::from));

        match self.list_script.lock().unwrap().pop_front() {
            Some(result) => result,
            // Exhausted script reads as an empty final page
            None => Ok(ListingPage {
                recordings: Vec::new(),
                next_cursor: None,
            }),
        }
    }

    async fn open_recording(&self, uri: &str) -> Result<RemoteDownload, RemoteError> {
        let attempt = {
            let mut counts = self.open_counts.lock().unwrap();
            let entry = counts.entry(uri.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let (bytes, content_type, declared_length, fail_first, chunk_delay) = {
            let recordings = self.recordings.lock().unwrap();
            let script = recordings.get(uri).ok_or_else(|| RemoteError::Permanent {
                status: Some(404),
                message: format!("no scripted recording for {uri}"),
            })?;
            (
                script.bytes.clone(),
                script.content_type.clone(),
                script.declared_length,
                script.fail_first,
                script.chunk_delay,
            )
        };

        if attempt <= fail_first {
            return Err(RemoteError::Transient(format!(
                "scripted transient failure (attempt {attempt})"
            )));
        }

        let content_length = declared_length.or(Some(bytes.len() as u64));
        let chunks: Vec<Bytes> = bytes.chunks(1024).map(Bytes::copy_from_slice).collect();

        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, RemoteError>))
            .then(move |item| async move {
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed();

        Ok(RemoteDownload {
            content_length,
            content_type,
            stream,
        })
    }
}

/// A deterministic descriptor for index `i`
pub(crate) fn descriptor_n(i: u32) -> RecordingDescriptor {
    RecordingDescriptor {
        id: RecordingId::new(format!("RE{i:04}")),
        uri: format!("/recordings/RE{i:04}"),
        duration_seconds: 30,
        created_at: "2024-03-01T00:00:00Z"
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
        expected_size_bytes: None,
    }
}

/// A listing page holding descriptors for the given index range
pub(crate) fn page_of(ids: std::ops::Range<u32>, next_cursor: Option<&str>) -> ListingPage {
    ListingPage {
        recordings: ids.map(descriptor_n).collect(),
        next_cursor: next_cursor.map(String::from),
    }
}

/// The stock transient error used by listing scripts
pub(crate) fn scripted_error() -> RemoteError {
    RemoteError::Transient("scripted transient failure".into())
}
