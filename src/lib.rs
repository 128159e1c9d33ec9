//! # callrec-dl
//!
//! Backend library for acquiring call-recording audio from a remote
//! telephony API into a local content-addressed cache.
//!
//! ## Design Philosophy
//!
//! callrec-dl is designed to be:
//! - **Polite** - a shared token bucket bounds every outbound remote call
//! - **Resumable** - already-fetched recordings are verified cache hits,
//!   failed ones are retried on the next run
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding;
//!   the bundled REST surface is a thin layer over the engine
//! - **Event-driven** - consumers subscribe to run events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use callrec_dl::{AcquireFilter, Config, RecordingDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.remote.account_sid = "AC...".to_string();
//!     config.remote.auth_token = "secret".to_string();
//!     config.store.root_path = "/var/cache/recordings".into();
//!
//!     let downloader = RecordingDownloader::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = downloader.acquire_recordings(AcquireFilter::default()).await?;
//!     println!(
//!         "acquired {} recordings, {} cache hits, {} failed",
//!         report.succeeded, report.skipped, report.failed
//!     );
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Acquisition engine (coordinator and worker pool)
pub mod engine;
/// Error types
pub mod error;
/// Token-bucket rate limiting of remote calls
pub mod rate_limiter;
/// Remote telephony API client and listing walker
pub mod remote;
/// Retry policy with exponential backoff
pub mod retry;
/// Content-addressed local store
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, RemoteConfig, RetryConfig};
pub use engine::RecordingDownloader;
pub use error::{
    ApiError, DownloadFailure, Error, ErrorDetail, FailureKind, RemoteError, Result, StoreError,
    ToHttpStatus,
};
pub use rate_limiter::RateLimiter;
pub use remote::{HttpRemoteApi, RemoteApi};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::ContentStore;
pub use types::{
    AcquireFilter, CacheEntry, CacheStatus, Event, FailedRecording, RecordingDescriptor,
    RecordingId, RunReport, RunState,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()`
/// method, which cancels any active acquisition run cleanly.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use callrec_dl::{Config, RecordingDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = RecordingDownloader::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: RecordingDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
