//! Shared helpers for integration tests

use callrec_dl::{Config, RetryConfig};
use serde_json::json;
use std::time::Duration;

/// Config pointing at a wiremock server, with fast retries and a temp store
pub fn test_config(base_url: &str, store_root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.remote.base_url = base_url.to_string();
    config.remote.page_size = 10;
    config.store.root_path = store_root.to_path_buf();
    config.acquisition.max_concurrent_downloads = 4;
    config.acquisition.download_timeout = Duration::from_secs(5);
    config.limits.rate_limit_per_second = 1000.0;
    config.limits.burst_capacity = 100;
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// JSON body for one listing page
pub fn listing_body(ids: &[&str], next_cursor: Option<&str>) -> serde_json::Value {
    let recordings: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "uri": format!("/recordings/{id}/media"),
                "duration_seconds": 42,
                "created_at": "2024-03-01T12:00:00Z",
                // A field the engine does not know about, must be ignored
                "price_unit": "USD"
            })
        })
        .collect();

    json!({
        "recordings": recordings,
        "next_cursor": next_cursor,
    })
}
