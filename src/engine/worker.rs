//! Download worker pool — shared task queue, per-task flow and run counters
//!
//! Workers drain a shared queue of download tasks. Per task: cache check,
//! store reservation, rate-limited streaming transfer with a duration cap,
//! commit on success, retry policy on failure. Outcomes land in the shared
//! run counters via atomic increments; only the failed-id list takes a lock.

use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadFailure, FailureKind, StoreError};
use crate::rate_limiter::RateLimiter;
use crate::remote::RemoteApi;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{ContentStore, WriteHandle};
use crate::types::{
    CacheStatus, Event, FailedRecording, RecordingDescriptor, RunReport,
};

/// Ephemeral unit of work binding one descriptor to an attempt counter
///
/// Owned exclusively by the worker that dequeues it.
#[derive(Debug)]
pub(crate) struct DownloadTask {
    pub(crate) descriptor: RecordingDescriptor,
    pub(crate) attempt: u32,
}

/// Shared task queue with outstanding-work accounting
///
/// `outstanding` counts tasks that have been pushed but not yet reached a
/// terminal outcome; retries keep their count. The queue is drained once the
/// listing is done and `outstanding` hits zero.
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<DownloadTask>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DownloadTask>>,
    outstanding: AtomicU64,
    listing_done: AtomicBool,
    drained: Notify,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            outstanding: AtomicU64::new(0),
            listing_done: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    /// Enqueue a fresh task; counts toward outstanding work
    pub(crate) fn push(&self, descriptor: RecordingDescriptor) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the queue itself, so send cannot fail
        let _ = self.tx.send(DownloadTask {
            descriptor,
            attempt: 1,
        });
    }

    /// Re-enqueue a retry; the task is already counted
    pub(crate) fn requeue(&self, task: DownloadTask) {
        let _ = self.tx.send(task);
    }

    /// Dequeue the next task; `None` once the channel closes
    pub(crate) async fn pop(&self) -> Option<DownloadTask> {
        self.rx.lock().await.recv().await
    }

    /// Mark one outstanding task as terminally resolved
    pub(crate) fn task_done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.listing_done.load(Ordering::SeqCst) {
            self.drained.notify_waiters();
        }
    }

    /// Signal that no further fresh tasks will be pushed
    pub(crate) fn mark_listing_done(&self) {
        self.listing_done.store(true, Ordering::SeqCst);
        if self.outstanding.load(Ordering::SeqCst) == 0 {
            self.drained.notify_waiters();
        }
    }

    fn is_drained(&self) -> bool {
        self.listing_done.load(Ordering::SeqCst) && self.outstanding.load(Ordering::SeqCst) == 0
    }

    /// Wait until the listing is done and every task reached a terminal outcome
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// Drop all queued-but-undispatched tasks (cancellation path)
    ///
    /// Dropped tasks were never attempted; they simply leave the outstanding
    /// count.
    pub(crate) async fn discard_pending(&self) -> u64 {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            self.task_done();
            dropped += 1;
        }
        dropped
    }
}

/// Shared, synchronized run outcome accumulators
///
/// Counter buckets are atomics so concurrent workers never contend; the
/// failed list is the only field behind a lock.
#[derive(Default)]
pub(crate) struct RunCounters {
    pub(crate) attempted: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    failures: std::sync::Mutex<Vec<FailedRecording>>,
}

impl RunCounters {
    pub(crate) fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self, failure: FailedRecording) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(failure);
    }

    /// Produce the final read-only report
    pub(crate) fn snapshot(&self, cursor_restarts: u64, cancelled: bool) -> RunReport {
        RunReport {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failures: self
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            cursor_restarts,
            cancelled,
        }
    }
}

/// Everything one worker needs, cloneable per worker
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) remote: Arc<dyn RemoteApi>,
    pub(crate) store: ContentStore,
    pub(crate) limiter: RateLimiter,
    pub(crate) policy: RetryPolicy,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) counters: Arc<RunCounters>,
    pub(crate) events: tokio::sync::broadcast::Sender<Event>,
    /// Run-level cancellation signal
    pub(crate) cancel: CancellationToken,
    /// Pool shutdown, fired by the coordinator once the queue is drained
    pub(crate) shutdown: CancellationToken,
    pub(crate) download_cost: u32,
    pub(crate) download_timeout: Duration,
    pub(crate) cancel_grace: Duration,
}

impl WorkerContext {
    fn emit(&self, event: Event) {
        // send() errors when nobody subscribes, which is fine
        let _ = self.events.send(event);
    }
}

/// One worker's drain loop
pub(crate) async fn run_worker(ctx: WorkerContext, worker_id: usize) {
    loop {
        let task = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            _ = ctx.cancel.cancelled() => break,
            task = ctx.queue.pop() => match task {
                Some(task) => task,
                None => break,
            },
        };

        process_task(&ctx, task).await;
    }
    tracing::debug!(worker_id, "download worker stopped");
}

/// Per-task flow: cache check, reserve, transfer, commit/retry
async fn process_task(ctx: &WorkerContext, task: DownloadTask) {
    let id = task.descriptor.id.clone();

    // Retries re-enter here; only the first attempt counts as attempted
    if task.attempt == 1 {
        ctx.counters.attempted.fetch_add(1, Ordering::SeqCst);
    }

    // (1) Serve from cache when complete
    match ctx.store.lookup(&id).await {
        Ok(Some(entry)) if entry.status == CacheStatus::Complete => {
            tracing::debug!(recording_id = %id, "already cached, skipping");
            ctx.counters.record_skip();
            ctx.emit(Event::RecordingSkipped { id });
            ctx.queue.task_done();
            return;
        }
        Ok(_) => {}
        Err(err) => {
            let failure = DownloadFailure::from(&err);
            handle_failure(ctx, task, failure).await;
            return;
        }
    }

    // (2) Reserve the id; losing the race means another owner has it
    let handle = match ctx.store.begin_write(&id).await {
        Ok(handle) => handle,
        Err(
            err @ (StoreError::AlreadyInFlight { .. } | StoreError::AlreadyComplete { .. }),
        ) => {
            tracing::debug!(recording_id = %id, reason = %err, "skipping recording");
            ctx.counters.record_skip();
            ctx.emit(Event::RecordingSkipped { id });
            ctx.queue.task_done();
            return;
        }
        Err(err) => {
            let failure = DownloadFailure::from(&err);
            handle_failure(ctx, task, failure).await;
            return;
        }
    };

    // (3)+(4) Rate-limited streaming transfer, raced against cancellation.
    // On cancellation the transfer gets a grace period to finish before the
    // handle is aborted.
    let mut handle = handle;
    let outcome = {
        let transfer = transfer_bytes(ctx, &task.descriptor, &mut handle);
        let mut transfer = std::pin::pin!(transfer);
        tokio::select! {
            result = &mut transfer => result,
            _ = ctx.cancel.cancelled() => {
                match tokio::time::timeout(ctx.cancel_grace, &mut transfer).await {
                    Ok(result) => result,
                    Err(_) => Err(DownloadFailure::new(
                        FailureKind::Cancelled,
                        "run cancelled mid-transfer",
                    )),
                }
            }
        }
    };

    match outcome {
        Ok(()) => {
            // (5) Validate and atomically publish
            match ctx
                .store
                .commit(handle, task.descriptor.expected_size_bytes)
                .await
            {
                Ok(entry) => {
                    tracing::info!(
                        recording_id = %id,
                        size_bytes = entry.size_bytes,
                        "recording acquired"
                    );
                    ctx.counters.record_success();
                    ctx.emit(Event::RecordingComplete {
                        id,
                        size_bytes: entry.size_bytes,
                    });
                    ctx.queue.task_done();
                }
                Err(err) => {
                    let failure = DownloadFailure::from(&err);
                    handle_failure(ctx, task, failure).await;
                }
            }
        }
        Err(failure) => {
            ctx.store.abort(handle).await;
            handle_failure(ctx, task, failure).await;
        }
    }
}

/// Stream one recording's bytes into the write handle under the transfer cap
async fn transfer_bytes(
    ctx: &WorkerContext,
    descriptor: &RecordingDescriptor,
    handle: &mut WriteHandle,
) -> Result<(), DownloadFailure> {
    // Quota wait does not count against the transfer duration cap
    ctx.limiter.acquire(ctx.download_cost).await;

    let work = async {
        let download = ctx
            .remote
            .open_recording(&descriptor.uri)
            .await
            .map_err(|e| DownloadFailure::from(&e))?;

        if let Some(content_type) = download.content_type.as_deref() {
            handle.set_content_type(content_type);
        }

        // Incremental streaming; the whole file is never buffered in memory
        let mut stream = download.stream;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadFailure::from(&e))?;
            handle
                .append(&chunk)
                .await
                .map_err(|e| DownloadFailure::from(&e))?;
        }
        Ok(())
    };

    match tokio::time::timeout(ctx.download_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(DownloadFailure::new(
            FailureKind::TransientNetwork,
            format!(
                "transfer exceeded the {}ms duration cap",
                ctx.download_timeout.as_millis()
            ),
        )),
    }
}

/// Consult the retry policy and either requeue with backoff or record failure
async fn handle_failure(ctx: &WorkerContext, task: DownloadTask, failure: DownloadFailure) {
    let id = task.descriptor.id.clone();

    match ctx.policy.decide(&failure, task.attempt) {
        RetryDecision::Retry(delay) => {
            tracing::warn!(
                recording_id = %id,
                attempt = task.attempt,
                delay_ms = delay.as_millis(),
                error = %failure.message,
                "download failed, requeueing with backoff"
            );

            let next = DownloadTask {
                descriptor: task.descriptor,
                attempt: task.attempt + 1,
            };
            let queue = Arc::clone(&ctx.queue);
            let counters = Arc::clone(&ctx.counters);
            let store = ctx.store.clone();
            let events = ctx.events.clone();
            let cancel = ctx.cancel.clone();

            // The backoff timer runs off-worker so the worker can drain other
            // tasks meanwhile; the task stays outstanding until redispatched.
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        queue.requeue(next);
                    }
                    _ = cancel.cancelled() => {
                        let id = next.descriptor.id.clone();
                        counters.record_failure(FailedRecording {
                            id: id.clone(),
                            kind: FailureKind::Cancelled,
                            message: "run cancelled before retry".into(),
                        });
                        let _ = events.send(Event::RecordingFailed {
                            id: id.clone(),
                            kind: FailureKind::Cancelled,
                        });
                        if let Err(e) = store.record_failure(&id, FailureKind::Cancelled).await {
                            tracing::warn!(recording_id = %id, error = %e, "failed to record cancelled entry");
                        }
                        queue.task_done();
                    }
                }
            });
        }
        RetryDecision::GiveUp => {
            tracing::error!(
                recording_id = %id,
                attempts = task.attempt,
                kind = %failure.kind,
                error = %failure.message,
                "download failed permanently"
            );

            ctx.counters.record_failure(FailedRecording {
                id: id.clone(),
                kind: failure.kind,
                message: failure.message,
            });
            ctx.emit(Event::RecordingFailed {
                id: id.clone(),
                kind: failure.kind,
            });
            if let Err(e) = ctx.store.record_failure(&id, failure.kind).await {
                tracing::warn!(recording_id = %id, error = %e, "failed to record failed entry");
            }
            ctx.queue.task_done();
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::descriptor_n;

    #[tokio::test]
    async fn queue_drains_once_listing_done_and_tasks_resolve() {
        let queue = Arc::new(TaskQueue::new());

        queue.push(descriptor_n(1));
        queue.push(descriptor_n(2));
        queue.mark_listing_done();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_drained().await })
        };

        assert!(!waiter.is_finished());
        let _t1 = queue.pop().await.unwrap();
        let _t2 = queue.pop().await.unwrap();
        queue.task_done();
        queue.task_done();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("queue should drain")
            .unwrap();
    }

    #[tokio::test]
    async fn requeued_task_keeps_outstanding_count() {
        let queue = Arc::new(TaskQueue::new());
        queue.push(descriptor_n(1));
        queue.mark_listing_done();

        let task = queue.pop().await.unwrap();
        assert_eq!(task.attempt, 1);
        queue.requeue(DownloadTask {
            descriptor: task.descriptor,
            attempt: task.attempt + 1,
        });

        // Still outstanding: the drain must not fire yet
        let drained = tokio::time::timeout(Duration::from_millis(50), queue.wait_drained()).await;
        assert!(drained.is_err(), "requeued task must keep the queue open");

        let retry = queue.pop().await.unwrap();
        assert_eq!(retry.attempt, 2);
        queue.task_done();

        tokio::time::timeout(Duration::from_secs(1), queue.wait_drained())
            .await
            .expect("queue should drain after the retry resolves");
    }

    #[tokio::test]
    async fn discard_pending_resolves_undispatched_tasks() {
        let queue = Arc::new(TaskQueue::new());
        for i in 0..5 {
            queue.push(descriptor_n(i));
        }
        queue.mark_listing_done();

        let dropped = queue.discard_pending().await;
        assert_eq!(dropped, 5);

        tokio::time::timeout(Duration::from_secs(1), queue.wait_drained())
            .await
            .expect("queue should drain after discarding pending tasks");
    }

    #[test]
    fn counters_snapshot_reflects_recorded_outcomes() {
        let counters = RunCounters::default();
        counters.attempted.fetch_add(3, Ordering::SeqCst);
        counters.record_success();
        counters.record_skip();
        counters.record_failure(FailedRecording {
            id: descriptor_n(9).id,
            kind: FailureKind::TransientNetwork,
            message: "gave up".into(),
        });

        let report = counters.snapshot(2, false);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.cursor_restarts, 2);
        assert!(!report.cancelled);
    }
}
