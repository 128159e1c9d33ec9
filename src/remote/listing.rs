//! Listing walker — lazy, restartable enumeration of remote recordings
//!
//! Follows pagination cursors through the remote listing API, retrying
//! transient failures on the *same* page without advancing the cursor, and
//! restarting the walk from the beginning when the remote invalidates the
//! cursor. Restart means a fresh walk, never resuming mid-page; re-listing
//! is safe because the content store deduplicates.

use std::sync::Arc;

use crate::error::{DownloadFailure, RemoteError};
use crate::rate_limiter::RateLimiter;
use crate::remote::{ListRequest, RemoteApi};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{AcquireFilter, RecordingDescriptor};

/// Opaque pagination token plus a monotonically increasing page sequence
///
/// Created by the first listing call, consumed and replaced on each
/// subsequent call, discarded when the walk terminates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCursor {
    /// Token to pass to the next listing call
    pub token: String,
    /// Pages fetched so far in this walk
    pub sequence: u64,
}

/// One page of descriptors produced by the walker
#[derive(Debug)]
pub struct WalkerPage {
    /// Descriptors on this page, in remote listing order
    pub descriptors: Vec<RecordingDescriptor>,
    /// Whether more pages follow
    pub has_more: bool,
    /// 1-based sequence of this page within the current walk
    pub sequence: u64,
}

/// Lazy, restartable sequence of remote recording descriptors
pub struct ListingWalker {
    remote: Arc<dyn RemoteApi>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    filter: AcquireFilter,
    page_size: usize,
    list_cost: u32,
    cursor: Option<PageCursor>,
    pages_fetched: u64,
    restarts: u64,
    finished: bool,
}

impl ListingWalker {
    /// Create a walker for one acquisition run
    ///
    /// The time-window filter is forwarded to the remote on every call;
    /// filtering happens server-side and is never re-applied locally.
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        filter: AcquireFilter,
        page_size: usize,
        list_cost: u32,
    ) -> Self {
        Self {
            remote,
            limiter,
            policy,
            filter,
            page_size,
            list_cost,
            cursor: None,
            pages_fetched: 0,
            restarts: 0,
            finished: false,
        }
    }

    /// Times the walk restarted after remote cursor invalidation
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Fetch the next page of descriptors
    ///
    /// Returns `None` once the remote reports no further pages. Each
    /// underlying listing call consumes one "list" unit of rate-limiter
    /// budget. Transient errors retry the same page per the retry policy;
    /// cursor invalidation restarts the walk and is never fatal.
    pub async fn next_page(&mut self) -> Result<Option<WalkerPage>, RemoteError> {
        if self.finished {
            return Ok(None);
        }

        let mut attempt = 0u32;

        loop {
            self.limiter.acquire(self.list_cost).await;

            let request = ListRequest {
                cursor: self.cursor.as_ref().map(|c| c.token.as_str()),
                filter: &self.filter,
                page_size: self.page_size,
            };

            match self.remote.list_page(request).await {
                Ok(page) => {
                    self.pages_fetched += 1;
                    let sequence = self.pages_fetched;

                    match page.next_cursor {
                        Some(token) => {
                            self.cursor = Some(PageCursor { token, sequence });
                        }
                        None => {
                            self.cursor = None;
                            self.finished = true;
                        }
                    }

                    tracing::debug!(
                        page = sequence,
                        descriptors = page.recordings.len(),
                        has_more = !self.finished,
                        "listing page fetched"
                    );

                    return Ok(Some(WalkerPage {
                        descriptors: page.recordings,
                        has_more: !self.finished,
                        sequence,
                    }));
                }
                Err(RemoteError::CursorExpired) => {
                    // Fresh walk from the beginning; dedup downstream makes
                    // re-listing idempotent. Not counted against the retry
                    // budget for the page.
                    self.restarts += 1;
                    self.cursor = None;
                    self.pages_fetched = 0;
                    attempt = 0;
                    tracing::warn!(
                        restarts = self.restarts,
                        "listing cursor expired, restarting walk from the beginning"
                    );
                }
                Err(err) => {
                    attempt += 1;
                    let failure = DownloadFailure::from(&err);
                    match self.policy.decide(&failure, attempt) {
                        RetryDecision::Retry(delay) => {
                            tracing::warn!(
                                error = %err,
                                attempt,
                                delay_ms = delay.as_millis(),
                                "listing call failed, retrying same page"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(
                                error = %err,
                                attempts = attempt,
                                "listing call failed permanently"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}
