//! Application state for the API server

use crate::config::Config;
use crate::engine::RecordingDownloader;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (cheap Arc clone); provides access to the engine
/// instance and configuration.
#[derive(Clone)]
pub struct AppState {
    /// The acquisition engine instance
    pub engine: Arc<RecordingDownloader>,

    /// Configuration (read access)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(engine: Arc<RecordingDownloader>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
