//! Acquisition coordinator — sequences one end-to-end run
//!
//! State machine: Idle → Listing → Dispatching → Draining → Done. Listing
//! and dispatching proceed concurrently: descriptors from each page are
//! filtered against the content store and enqueued while later pages are
//! still being fetched. The coordinator never retries listing or download
//! logic itself; that is delegated to the walker and the workers. Its sole
//! responsibility is sequencing and report aggregation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::RecordingDownloader;
use super::worker::{RunCounters, TaskQueue, WorkerContext, run_worker};
use crate::remote::listing::ListingWalker;
use crate::types::{AcquireFilter, CacheStatus, Event, RunReport, RunState};

impl RecordingDownloader {
    /// Execute one acquisition run to completion (or cancellation)
    ///
    /// Always returns a report: per-recording failures are contained and
    /// aggregated, and a permanent listing failure stops enumeration but
    /// still drains the work already dispatched.
    pub(crate) async fn run_acquisition(
        &self,
        filter: AcquireFilter,
        cancel: CancellationToken,
    ) -> RunReport {
        let counters = Arc::new(RunCounters::default());
        let queue = Arc::new(TaskQueue::new());
        let shutdown = CancellationToken::new();

        self.set_run_state(RunState::Listing);
        self.emit_event(Event::RunStarted {
            filter: filter.clone(),
        });

        let ctx = WorkerContext {
            remote: Arc::clone(&self.remote),
            store: self.store.clone(),
            limiter: self.limiter.clone(),
            policy: self.policy.clone(),
            queue: Arc::clone(&queue),
            counters: Arc::clone(&counters),
            events: self.event_tx.clone(),
            cancel: cancel.clone(),
            shutdown: shutdown.clone(),
            download_cost: self.config.limits.download_cost,
            download_timeout: self.config.acquisition.download_timeout,
            cancel_grace: self.config.acquisition.cancel_grace,
        };

        let mut workers = tokio::task::JoinSet::new();
        for worker_id in 0..self.config.acquisition.max_concurrent_downloads {
            let ctx = ctx.clone();
            workers.spawn(run_worker(ctx, worker_id));
        }

        let mut walker = ListingWalker::new(
            Arc::clone(&self.remote),
            self.limiter.clone(),
            self.policy.clone(),
            filter,
            self.config.remote.page_size,
            self.config.limits.list_cost,
        );
        let mut reported_restarts = 0u64;

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                page = walker.next_page() => page,
            };

            match page {
                Ok(Some(page)) => {
                    if walker.restarts() > reported_restarts {
                        reported_restarts = walker.restarts();
                        self.emit_event(Event::CursorExpired {
                            restarts: reported_restarts,
                        });
                    }
                    self.emit_event(Event::PageListed {
                        page: page.sequence,
                        descriptors: page.descriptors.len(),
                    });

                    // Cache hits are counted skipped and never enqueued;
                    // everything else goes to the worker pool in page order.
                    for descriptor in page.descriptors {
                        match self.store.lookup(&descriptor.id).await {
                            Ok(Some(entry)) if entry.status == CacheStatus::Complete => {
                                counters.record_skip();
                                self.emit_event(Event::RecordingSkipped {
                                    id: descriptor.id,
                                });
                            }
                            _ => queue.push(descriptor),
                        }
                    }

                    self.set_run_state(RunState::Dispatching);

                    if !page.has_more {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        "listing failed permanently, draining already-dispatched work"
                    );
                    break;
                }
            }
        }

        self.set_run_state(RunState::Draining);
        queue.mark_listing_done();

        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = queue.wait_drained() => cancel.is_cancelled(),
        };

        if cancelled {
            let dropped = queue.discard_pending().await;
            if dropped > 0 {
                tracing::info!(dropped, "dropped undispatched tasks on cancellation");
            }
            // In-flight transfers finish or abort within the grace period;
            // their handles guarantee no partial file stays visible.
            queue.wait_drained().await;
        }

        shutdown.cancel();
        while workers.join_next().await.is_some() {}

        let report = counters.snapshot(walker.restarts(), cancelled);
        self.set_run_state(RunState::Done);
        self.emit_event(Event::RunFinished {
            report: report.clone(),
        });

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cursor_restarts = report.cursor_restarts,
            cancelled = report.cancelled,
            "acquisition run finished"
        );

        report
    }
}
