//! Acquisition engine (decomposed into focused submodules)
//!
//! The `RecordingDownloader` struct is the explicitly constructed engine
//! instance: it holds the injected rate limiter, content store, retry policy
//! and remote client behind Arcs, and is the only component the external
//! tool surface calls into.
//!
//! - [`coordinator`] - run sequencing and report aggregation
//! - [`worker`] - task queue and download worker pool

mod coordinator;
mod worker;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::remote::{HttpRemoteApi, RemoteApi};
use crate::retry::RetryPolicy;
use crate::store::ContentStore;
use crate::types::{AcquireFilter, CacheEntry, Event, RecordingId, RunReport, RunState};

/// Main acquisition engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct RecordingDownloader {
    /// Configuration (shared across tasks)
    pub(crate) config: Arc<Config>,
    /// Content-addressed local store; the deduplication authority
    pub(crate) store: ContentStore,
    /// Remote listing and byte retrieval
    pub(crate) remote: Arc<dyn RemoteApi>,
    /// Token bucket shared by the walker and all workers
    pub(crate) limiter: RateLimiter,
    /// Pure retry/backoff decision function
    pub(crate) policy: RetryPolicy,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Serializes runs: one acquisition at a time per engine instance
    run_gate: Arc<tokio::sync::Mutex<()>>,
    /// Cancellation token of the active run, if any
    active_run: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    /// Coordinator state machine, for observability
    run_state: Arc<std::sync::Mutex<RunState>>,
    /// Cleared during shutdown; no new runs are accepted afterwards
    accepting_new: Arc<AtomicBool>,
}

impl RecordingDownloader {
    /// Create a new engine talking to the configured HTTP remote
    ///
    /// Validates the configuration (invalid limiter/pool settings are fatal
    /// here, before any run can begin) and opens the content store.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let remote: Arc<dyn RemoteApi> = Arc::new(HttpRemoteApi::new(config.remote.clone())?);
        Self::with_remote(config, remote).await
    }

    /// Create an engine with an injected remote implementation
    ///
    /// Used by tests and embedders that substitute their own transport.
    pub async fn with_remote(config: Config, remote: Arc<dyn RemoteApi>) -> Result<Self> {
        config.validate()?;

        let store = ContentStore::open(config.store.root_path.clone()).await?;
        let limiter = RateLimiter::new(
            config.limits.rate_limit_per_second,
            config.limits.burst_capacity,
        );
        let policy = RetryPolicy::new(config.retry.clone());

        // Buffered so slow subscribers don't stall the run
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::info!(
            store_root = %config.store.root_path.display(),
            workers = config.acquisition.max_concurrent_downloads,
            rate_limit_per_second = config.limits.rate_limit_per_second,
            burst_capacity = config.limits.burst_capacity,
            "recording downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            remote,
            limiter,
            policy,
            event_tx,
            run_gate: Arc::new(tokio::sync::Mutex::new(())),
            active_run: Arc::new(std::sync::Mutex::new(None)),
            run_state: Arc::new(std::sync::Mutex::new(RunState::Idle)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Run a full acquisition: listing → fan-out download → report
    ///
    /// One run at a time per engine instance; a second call while a run is
    /// active fails with [`Error::RunInProgress`]. The run always terminates
    /// with a report, even when cancelled.
    pub async fn acquire_recordings(&self, filter: AcquireFilter) -> Result<RunReport> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let _guard = self.run_gate.try_lock().map_err(|_| Error::RunInProgress)?;

        let cancel = CancellationToken::new();
        self.set_active_run(Some(cancel.clone()));

        let report = self.run_acquisition(filter, cancel).await;

        self.set_active_run(None);
        Ok(report)
    }

    /// Pure cache lookup; never contacts the remote API
    pub async fn get_recording(&self, id: &RecordingId) -> Result<Option<CacheEntry>> {
        Ok(self.store.lookup(id).await?)
    }

    /// Signal the active run to cancel
    ///
    /// Returns true when a run was active. The run itself still returns its
    /// report through the original `acquire_recordings` call.
    pub fn cancel_run(&self) -> bool {
        let active = self
            .active_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Current coordinator state
    pub fn run_state(&self) -> RunState {
        *self
            .run_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to acquisition events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber that falls behind by more than 1000
    /// events receives a `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration (cheap Arc clone)
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Stop accepting new runs, cancel the active one and wait for it
    pub async fn shutdown(&self) -> Result<()> {
        self.accepting_new.store(false, Ordering::SeqCst);
        if self.cancel_run() {
            tracing::info!("cancelling active acquisition run for shutdown");
        }
        // The run gate is free once the active run has returned its report
        let _guard = self.run_gate.lock().await;
        tracing::info!("recording downloader shut down");
        Ok(())
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server runs concurrently with acquisition runs and listens on the
    /// configured bind address.
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let engine = Arc::clone(self);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move { crate::api::start_api_server(engine, config).await })
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// acquisition continues even when nobody is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn set_run_state(&self, state: RunState) {
        *self
            .run_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn set_active_run(&self, token: Option<CancellationToken>) {
        *self
            .active_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }
}
