//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the callrec-dl REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the callrec-dl REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "callrec-dl REST API",
        version = "0.1.0",
        description = "REST API for acquiring call recordings from a remote telephony API into a local content-addressed cache",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        // Recordings
        crate::api::routes::acquire_recordings,
        crate::api::routes::get_recording,

        // Runs
        crate::api::routes::cancel_run,

        // System
        crate::api::routes::health_check,
        crate::api::routes::get_config,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::RecordingId,
        crate::types::RecordingDescriptor,
        crate::types::CacheStatus,
        crate::types::CacheEntry,
        crate::types::AcquireFilter,
        crate::types::FailedRecording,
        crate::types::RunReport,
        crate::types::RunState,

        // Error taxonomy
        crate::error::FailureKind,
        crate::error::ApiError,
        crate::error::ErrorDetail,

        // API request/response types
        crate::api::routes::CancelResponse,
    )),
    tags(
        (name = "recordings", description = "Recording acquisition and cache lookup"),
        (name = "runs", description = "Acquisition run control"),
        (name = "system", description = "Health, configuration and documentation")
    )
)]
pub struct ApiDoc;
