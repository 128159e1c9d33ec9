//! Recording acquisition and lookup handlers

use crate::api::AppState;
use crate::error::Error;
use crate::types::{AcquireFilter, RecordingId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response to a run-cancellation request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    /// Whether an active run was signalled to cancel
    pub cancelled: bool,
}

/// POST /recordings/acquire - Trigger a full acquisition run
///
/// Blocks until the run finishes (or is cancelled) and returns the report.
/// The request body is the optional time-window filter.
#[utoipa::path(
    post,
    path = "/recordings/acquire",
    tag = "recordings",
    request_body(content = AcquireFilter, description = "Optional time-window filter"),
    responses(
        (status = 200, description = "Run finished, report returned", body = crate::types::RunReport),
        (status = 409, description = "A run is already in progress", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn acquire_recordings(
    State(state): State<AppState>,
    filter: Option<Json<AcquireFilter>>,
) -> Result<impl IntoResponse, Error> {
    let filter = filter.map(|Json(filter)| filter).unwrap_or_default();
    let report = state.engine.acquire_recordings(filter).await?;
    Ok((StatusCode::OK, Json(report)))
}

/// GET /recordings/:id - Look up one recording in the local cache
///
/// Pure cache lookup; never contacts the remote API.
#[utoipa::path(
    get,
    path = "/recordings/{id}",
    tag = "recordings",
    params(
        ("id" = String, Path, description = "Recording identifier")
    ),
    responses(
        (status = 200, description = "Cache entry for the recording", body = crate::types::CacheEntry),
        (status = 404, description = "Recording not in the cache", body = crate::error::ApiError)
    )
)]
pub async fn get_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = RecordingId::new(id);
    match state.engine.get_recording(&id).await? {
        Some(entry) => Ok((StatusCode::OK, Json(entry))),
        None => Err(Error::NotFound(format!("recording {id}"))),
    }
}

/// POST /runs/cancel - Cancel the active acquisition run
///
/// The run itself still returns its report through the original acquire
/// call; this endpoint only delivers the cancellation signal.
#[utoipa::path(
    post,
    path = "/runs/cancel",
    tag = "runs",
    responses(
        (status = 200, description = "Cancellation signal delivered (or no run active)", body = CancelResponse)
    )
)]
pub async fn cancel_run(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = state.engine.cancel_run();
    (StatusCode::OK, Json(CancelResponse { cancelled }))
}
