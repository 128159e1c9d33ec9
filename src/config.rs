//! Configuration types for callrec-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Main configuration for the recording downloader
///
/// Fields are organized into logical sub-configs:
/// - [`remote`](RemoteConfig) — remote API base URL, credentials, listing page size
/// - [`acquisition`](AcquisitionConfig) — worker pool sizing and transfer timeouts
/// - [`limits`](LimiterConfig) — token-bucket rate limiting of outbound calls
/// - [`retry`](RetryConfig) — backoff behavior for transient failures
/// - [`store`](StoreConfig) — content store location
/// - [`api`](ApiConfig) — REST tool surface
///
/// Acquisition, limiter and store fields are flattened for a flat JSON/TOML
/// format; remote, retry and api remain nested sections.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Remote telephony API settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Worker pool and transfer settings
    #[serde(flatten)]
    pub acquisition: AcquisitionConfig,

    /// Outbound rate limiting
    #[serde(flatten)]
    pub limits: LimiterConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Content store settings
    #[serde(flatten)]
    pub store: StoreConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Validate limiter, pool and store settings
    ///
    /// Invalid settings are fatal at startup; a run never begins with a
    /// configuration that fails here.
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".into(),
                key: Some("max_concurrent_downloads".into()),
            });
        }
        if !(self.limits.rate_limit_per_second.is_finite()
            && self.limits.rate_limit_per_second > 0.0)
        {
            return Err(Error::Config {
                message: format!(
                    "rate_limit_per_second must be a positive finite number, got {}",
                    self.limits.rate_limit_per_second
                ),
                key: Some("rate_limit_per_second".into()),
            });
        }
        if self.limits.burst_capacity == 0 {
            return Err(Error::Config {
                message: "burst_capacity must be at least 1".into(),
                key: Some("burst_capacity".into()),
            });
        }
        if self.limits.list_cost > self.limits.burst_capacity
            || self.limits.download_cost > self.limits.burst_capacity
        {
            return Err(Error::Config {
                message: "list_cost and download_cost cannot exceed burst_capacity".into(),
                key: Some("burst_capacity".into()),
            });
        }
        if self.acquisition.download_timeout.is_zero() {
            return Err(Error::Config {
                message: "download_timeout must be greater than zero".into(),
                key: Some("download_timeout_ms".into()),
            });
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::Config {
                message: "retry initial_delay cannot exceed max_delay".into(),
                key: Some("retry.base_backoff_ms".into()),
            });
        }
        if self.store.root_path.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "store root_path cannot be empty".into(),
                key: Some("store_root_path".into()),
            });
        }
        if self.remote.page_size == 0 || self.remote.page_size > 1000 {
            return Err(Error::Config {
                message: format!(
                    "remote page_size must be between 1 and 1000, got {}",
                    self.remote.page_size
                ),
                key: Some("remote.page_size".into()),
            });
        }
        url::Url::parse(&self.remote.base_url).map_err(|e| Error::Config {
            message: format!("remote base_url is not a valid URL: {e}"),
            key: Some("remote.base_url".into()),
        })?;

        Ok(())
    }
}

/// Remote telephony API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RemoteConfig {
    /// Base URL of the remote API (default: "https://api.twilio.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Account SID used as the HTTP Basic username
    #[serde(default)]
    pub account_sid: String,

    /// Auth token used as the HTTP Basic password; never exposed via the API
    #[serde(default)]
    pub auth_token: String,

    /// Descriptors requested per listing page (default: 50, max: 1000)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            account_sid: String::new(),
            auth_token: String::new(),
            page_size: default_page_size(),
        }
    }
}

impl RemoteConfig {
    /// Whether HTTP Basic credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

/// Worker pool and transfer configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AcquisitionConfig {
    /// Number of concurrent download workers (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Maximum duration for one recording transfer, in milliseconds (default: 30000)
    #[serde(
        default = "default_download_timeout",
        with = "duration_ms_serde",
        rename = "download_timeout_ms"
    )]
    #[schema(value_type = u64)]
    pub download_timeout: Duration,

    /// Grace period given to in-flight transfers on cancellation, in milliseconds (default: 5000)
    #[serde(
        default = "default_cancel_grace",
        with = "duration_ms_serde",
        rename = "cancel_grace_ms"
    )]
    #[schema(value_type = u64)]
    pub cancel_grace: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            download_timeout: default_download_timeout(),
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// Token-bucket rate limiting of outbound remote calls
///
/// The bucket is shared by the listing walker and all download workers; no
/// remote call bypasses it.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LimiterConfig {
    /// Steady token refill rate (default: 5.0 tokens/second)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: f64,

    /// Bucket capacity, bounding burst size (default: 10)
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,

    /// Tokens consumed per listing call (default: 1)
    #[serde(default = "default_unit_cost")]
    pub list_cost: u32,

    /// Tokens consumed per download start (default: 1)
    #[serde(default = "default_unit_cost")]
    pub download_cost: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: default_rate_limit(),
            burst_capacity: default_burst_capacity(),
            list_cost: default_unit_cost(),
            download_cost: default_unit_cost(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of attempts per recording/page (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry, in milliseconds (default: 500)
    #[serde(
        default = "default_initial_delay",
        with = "duration_ms_serde",
        rename = "base_backoff_ms"
    )]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Cap on the delay between retries, in milliseconds (default: 30000)
    #[serde(
        default = "default_max_delay",
        with = "duration_ms_serde",
        rename = "max_backoff_ms"
    )]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Content store configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreConfig {
    /// Root directory of the content-addressed store (default: "./recordings")
    #[serde(default = "default_store_root", rename = "store_root_path")]
    #[schema(value_type = String)]
    pub root_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_path: default_store_root(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:7878)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            swagger_ui: true,
        }
    }
}

// Default value functions for serde

fn default_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    4
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_rate_limit() -> f64 {
    5.0
}

fn default_burst_capacity() -> u32 {
    10
}

fn default_unit_cost() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_bind_address() -> SocketAddr {
    "127.0.0.1:7878"
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7878)))
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds on the wire)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.max_concurrent_downloads, 4);
        assert_eq!(config.limits.burst_capacity, 10);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.remote.page_size, 50);
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut config = Config::default();
        config.acquisition.max_concurrent_downloads = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("max_concurrent_downloads"));
    }

    #[test]
    fn non_positive_rate_fails_validation() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.limits.rate_limit_per_second = rate;
            assert!(
                config.validate().is_err(),
                "rate {rate} should fail validation"
            );
        }
    }

    #[test]
    fn zero_burst_capacity_fails_validation() {
        let mut config = Config::default();
        config.limits.burst_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cost_exceeding_burst_fails_validation() {
        let mut config = Config::default();
        config.limits.burst_capacity = 2;
        config.limits.download_cost = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_download_timeout_fails_validation() {
        let mut config = Config::default();
        config.acquisition.download_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_delay_above_max_delay_fails_validation() {
        let mut config = Config::default();
        config.retry.initial_delay = Duration::from_secs(60);
        config.retry.max_delay = Duration::from_secs(30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_store_root_fails_validation() {
        let mut config = Config::default();
        config.store.root_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_base_url_fails_validation() {
        let mut config = Config::default();
        config.remote.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn page_size_out_of_range_fails_validation() {
        for page_size in [0, 1001] {
            let mut config = Config::default();
            config.remote.page_size = page_size;
            assert!(
                config.validate().is_err(),
                "page_size {page_size} should fail validation"
            );
        }
    }

    #[test]
    fn config_deserializes_from_flat_json() {
        let json = r#"{
            "max_concurrent_downloads": 8,
            "rate_limit_per_second": 2.5,
            "burst_capacity": 5,
            "download_timeout_ms": 10000,
            "store_root_path": "/var/cache/recordings",
            "retry": {
                "max_attempts": 3,
                "base_backoff_ms": 250,
                "max_backoff_ms": 5000
            },
            "remote": {
                "base_url": "https://api.example.com",
                "account_sid": "AC123",
                "auth_token": "secret",
                "page_size": 25
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.acquisition.max_concurrent_downloads, 8);
        assert_eq!(config.limits.rate_limit_per_second, 2.5);
        assert_eq!(config.limits.burst_capacity, 5);
        assert_eq!(
            config.acquisition.download_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(
            config.store.root_path,
            PathBuf::from("/var/cache/recordings")
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.remote.page_size, 25);
        assert!(config.remote.has_credentials());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["download_timeout_ms"], 30_000);
        assert_eq!(json["retry"]["base_backoff_ms"], 500);
        assert_eq!(json["retry"]["max_backoff_ms"], 30_000);
    }

    #[test]
    fn missing_credentials_detected() {
        let config = Config::default();
        assert!(!config.remote.has_credentials());
    }
}
