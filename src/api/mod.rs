//! REST API server module
//!
//! The tool-invocation surface over the acquisition engine. Two operations
//! drive the engine — `acquireRecordings` and `getRecording` — plus thin
//! system endpoints for health, redacted configuration and API docs.

use crate::config::Config;
use crate::engine::RecordingDownloader;
use crate::error::{Error, Result};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;


pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Recordings
/// - `POST /recordings/acquire` - Run a full acquisition, returns the run report
/// - `GET /recordings/:id` - Cache lookup for one recording (no network access)
///
/// ## Runs
/// - `POST /runs/cancel` - Cancel the active acquisition run
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /config` - Current configuration with credentials redacted
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(engine: Arc<RecordingDownloader>, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let router = Router::new()
        // Recordings
        .route("/recordings/acquire", post(routes::acquire_recordings))
        .route("/recordings/:id", get(routes::get_recording))
        // Runs
        .route("/runs/cancel", post(routes::cancel_run))
        // System
        .route("/health", get(routes::health_check))
        .route("/config", get(routes::get_config));

    // Merge Swagger UI routes if enabled in config (before applying state).
    // SwaggerUi serves `/openapi.json` itself, so only register the standalone
    // route for it when Swagger UI is disabled to avoid an overlapping route.
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/openapi.json", ApiDoc::openapi()))
    } else {
        router.route("/openapi.json", get(routes::openapi_spec))
    };

    let router = router.with_state(state);

    let router = if config.api.cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http())
}

/// Start the API server on the configured bind address
///
/// Creates a TCP listener, binds it to the configured address, and serves
/// the router until shut down.
pub async fn start_api_server(
    engine: Arc<RecordingDownloader>,
    config: Arc<Config>,
) -> Result<()> {
    let bind_address = config.api.bind_address;

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address).await.map_err(|e| {
        Error::ApiServerError(format!("failed to bind {bind_address}: {e}"))
    })?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))
}
