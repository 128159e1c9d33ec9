//! System handlers: health, redacted configuration, OpenAPI.

use crate::api::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "callrec-dl",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /config - Current configuration with credentials redacted
///
/// The auth token is never exposed; the response only reports whether
/// credentials are configured.
#[utoipa::path(
    get,
    path = "/config",
    tag = "system",
    responses(
        (status = 200, description = "Redacted configuration")
    )
)]
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;

    let body = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "remote": {
            "base_url": config.remote.base_url,
            "credentials_configured": config.remote.has_credentials(),
            "page_size": config.remote.page_size,
        },
        "max_concurrent_downloads": config.acquisition.max_concurrent_downloads,
        "download_timeout_ms": config.acquisition.download_timeout.as_millis() as u64,
        "rate_limit_per_second": config.limits.rate_limit_per_second,
        "burst_capacity": config.limits.burst_capacity,
        "retry": {
            "max_attempts": config.retry.max_attempts,
            "base_backoff_ms": config.retry.initial_delay.as_millis() as u64,
            "max_backoff_ms": config.retry.max_delay.as_millis() as u64,
        },
        "store_root_path": config.store.root_path,
        "run_state": state.engine.run_state(),
        "supported_audio_formats": [
            "wav", "mp3", "m4a", "aac", "ogg", "flac", "webm", "3gp", "amr"
        ],
    });

    (StatusCode::OK, Json(body))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
