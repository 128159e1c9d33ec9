//! HTTP error response handling for the API
//!
//! Conversions from domain errors to HTTP responses with appropriate status
//! codes and JSON error bodies.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Implement IntoResponse for Error to automatically convert errors to HTTP responses
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

/// Implement IntoResponse for ApiError for explicit error responses
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Default to 500 if we're directly converting an ApiError
        // (usually errors go through Error::into_response which has the status code)
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[tokio::test]
    async fn not_found_error_renders_404_with_json_body() {
        let error = Error::NotFound("recording RE1".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let api_error: ApiError = serde_json::from_slice(&body).unwrap();

        assert_eq!(api_error.error.code, "not_found");
        assert!(api_error.error.message.contains("RE1"));
    }

    #[tokio::test]
    async fn run_in_progress_renders_409() {
        let response = Error::RunInProgress.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn size_mismatch_renders_422_with_details() {
        let error = Error::Store(StoreError::SizeMismatch {
            id: "RE9".into(),
            expected: 100,
            actual: 90,
        });
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let api_error: ApiError = serde_json::from_slice(&body).unwrap();

        assert_eq!(api_error.error.code, "size_mismatch");
        let details = api_error.error.details.unwrap();
        assert_eq!(details["expected_bytes"], 100);
        assert_eq!(details["actual_bytes"], 90);
    }

    #[tokio::test]
    async fn shutting_down_renders_503() {
        let response = Error::ShuttingDown.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
