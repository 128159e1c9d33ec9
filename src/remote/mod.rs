//! Remote telephony API client
//!
//! The engine talks to the remote system through the [`RemoteApi`] trait:
//! paginated listing of recording descriptors and streamable per-recording
//! byte retrieval. [`HttpRemoteApi`] is the production implementation;
//! tests substitute their own. Every call is classified into a
//! [`RemoteError`] at this boundary so the rest of the engine never sees raw
//! HTTP errors.
//!
//! Credentials (account SID + auth token) are attached transparently per
//! request; the engine does not own token acquisition.

pub mod listing;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{Error, RemoteError, classify_reqwest, classify_status};
use crate::types::{AcquireFilter, RecordingDescriptor, RecordingId};

/// Stream of audio byte chunks from the remote
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

/// Parameters for one listing call
#[derive(Debug)]
pub struct ListRequest<'a> {
    /// Opaque pagination token from the previous page, if any
    pub cursor: Option<&'a str>,
    /// Server-side time-window filter
    pub filter: &'a AcquireFilter,
    /// Descriptors to request per page
    pub page_size: usize,
}

/// One page of listing results
#[derive(Debug)]
pub struct ListingPage {
    /// Validated descriptors on this page
    pub recordings: Vec<RecordingDescriptor>,
    /// Token for the next page; `None` when the walk is finished
    pub next_cursor: Option<String>,
}

/// An open, streamable recording transfer
pub struct RemoteDownload {
    /// Content-Length declared by the remote, when known
    pub content_length: Option<u64>,
    /// Content-Type reported by the remote
    pub content_type: Option<String>,
    /// The audio bytes, chunk by chunk
    pub stream: ByteStream,
}

/// Remote listing and byte retrieval
///
/// Implementations must be safe to share across the listing walker and all
/// download workers.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch one page of recording descriptors
    async fn list_page(&self, request: ListRequest<'_>) -> Result<ListingPage, RemoteError>;

    /// Open a streaming transfer for one recording's bytes
    async fn open_recording(&self, uri: &str) -> Result<RemoteDownload, RemoteError>;
}

/// Raw listing item as returned by the remote; unknown fields are dropped here
#[derive(Debug, serde::Deserialize)]
struct RawListingItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    duration_seconds: Option<u32>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
struct RawListingResponse {
    #[serde(default)]
    recordings: Vec<RawListingItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// HTTP implementation of [`RemoteApi`] using reqwest
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: Url,
    config: RemoteConfig,
}

impl HttpRemoteApi {
    /// Build a client from the remote configuration
    ///
    /// Only a connect timeout is set here; the per-transfer duration cap is
    /// enforced by the download workers so long audio files are not cut off
    /// by a blanket request timeout.
    pub fn new(config: RemoteConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("remote base_url is not a valid URL: {e}"),
            key: Some("remote.base_url".into()),
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("callrec-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Resolve a possibly relative recording URI against the API base
    fn resolve(&self, uri: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(uri)
            .map_err(|e| RemoteError::InvalidDescriptor(format!("unusable uri '{uri}': {e}")))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.has_credentials() {
            req.basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
        } else {
            req
        }
    }

    /// Validate one raw listing item into a descriptor
    ///
    /// Items missing required fields are dropped with a warning rather than
    /// failing the page; one malformed remote record must not stall the walk.
    fn validate_item(item: RawListingItem) -> Option<RecordingDescriptor> {
        let id = match item.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                tracing::warn!("dropping listing item without an id");
                return None;
            }
        };
        let uri = match item.uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => {
                tracing::warn!(recording_id = %id, "dropping listing item without a uri");
                return None;
            }
        };
        let created_at = match item.created_at {
            Some(ts) => ts,
            None => {
                tracing::warn!(recording_id = %id, "dropping listing item without created_at");
                return None;
            }
        };

        Some(RecordingDescriptor {
            id: RecordingId::new(id),
            uri,
            duration_seconds: item.duration_seconds.unwrap_or(0),
            created_at,
            expected_size_bytes: item.size_bytes,
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn list_page(&self, request: ListRequest<'_>) -> Result<ListingPage, RemoteError> {
        let url = self.resolve("/recordings")?;

        let mut req = self
            .client
            .get(url)
            .query(&[("page_size", request.page_size.to_string())]);
        if let Some(cursor) = request.cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        if let Some(since) = request.filter.since {
            req = req.query(&[("created_after", since.to_rfc3339())]);
        }
        if let Some(until) = request.filter.until {
            req = req.query(&[("created_before", until.to_rfc3339())]);
        }

        let response = self
            .with_auth(req)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            // A rejected cursor comes back as 400; the walk restarts from the
            // beginning rather than failing the run.
            if status.as_u16() == 400 && request.cursor.is_some() {
                return Err(RemoteError::CursorExpired);
            }
            return Err(classify_status(status.as_u16(), retry_after, body));
        }

        let raw: RawListingResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("listing body decode failed: {e}")))?;

        let recordings = raw
            .recordings
            .into_iter()
            .filter_map(Self::validate_item)
            .collect();

        Ok(ListingPage {
            recordings,
            next_cursor: raw.next_cursor,
        })
    }

    async fn open_recording(&self, uri: &str) -> Result<RemoteDownload, RemoteError> {
        let url = self.resolve(uri)?;

        let response = self
            .with_auth(self.client.get(url))
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after, body));
        }

        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| classify_reqwest(&e)))
            .boxed();

        Ok(RemoteDownload {
            content_length,
            content_type,
            stream,
        })
    }
}

/// Parse a Retry-After header (delta-seconds form only)
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
