//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`recordings`] — Acquisition runs and cache lookups
//! - [`system`] — Health, configuration, OpenAPI

mod recordings;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use recordings::*;
pub use system::*;
