//! Configuration types for faceswap-tasks

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration
///
/// Groups every tunable of the orchestration layer. Each sub-config has
/// sensible defaults, so `Config::default()` works for local development with
/// only an API token supplied.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Vendor task API connection settings
    #[serde(default)]
    pub vendor: VendorConfig,

    /// Akool API settings, used when the primary vendor has no token
    #[serde(default)]
    pub akool: AkoolConfig,

    /// Retry policy for idempotent vendor calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Task polling settings for synchronous call paths
    #[serde(default)]
    pub poll: PollConfig,

    /// Result transfer cache settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Local storage fallback settings
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Build a configuration from defaults overlaid with environment variables
    ///
    /// Recognized variables: `VMODEL_API_TOKEN`, `VMODEL_BASE_URL`,
    /// `AKOOL_CLIENT_ID`, `AKOOL_API_KEY`, `AKOOL_BASE_URL`,
    /// `AKOOL_DETECT_URL`, `LOCAL_STORAGE_DIR`. Empty values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(token) = env_non_empty("VMODEL_API_TOKEN") {
            config.vendor.api_token = Some(token);
        }
        if let Some(base_url) = env_non_empty("VMODEL_BASE_URL") {
            config.vendor.base_url = base_url;
        }
        if let Some(client_id) = env_non_empty("AKOOL_CLIENT_ID") {
            config.akool.client_id = Some(client_id);
        }
        if let Some(api_key) = env_non_empty("AKOOL_API_KEY") {
            config.akool.api_key = Some(api_key);
        }
        if let Some(base_url) = env_non_empty("AKOOL_BASE_URL") {
            config.akool.base_url = base_url;
        }
        if let Some(detect_url) = env_non_empty("AKOOL_DETECT_URL") {
            config.akool.detect_url = detect_url;
        }
        if let Some(dir) = env_non_empty("LOCAL_STORAGE_DIR") {
            config.storage.local_dir = PathBuf::from(dir);
        }

        config
    }

    /// Check the configuration for values that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.vendor.base_url).map_err(|e| Error::Config {
            message: format!("invalid vendor base URL '{}': {}", self.vendor.base_url, e),
            key: Some("vendor.base_url".to_string()),
        })?;

        for (key, value) in [
            ("akool.base_url", &self.akool.base_url),
            ("akool.detect_url", &self.akool.detect_url),
        ] {
            url::Url::parse(value).map_err(|e| Error::Config {
                message: format!("invalid Akool URL '{}': {}", value, e),
                key: Some(key.to_string()),
            })?;
        }

        if self.akool.token_refresh.is_zero() {
            return Err(Error::Config {
                message: "Akool token refresh interval must be greater than zero".to_string(),
                key: Some("akool.token_refresh".to_string()),
            });
        }

        if self.poll.interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".to_string(),
                key: Some("poll.interval".to_string()),
            });
        }

        if self.transfer.ttl.is_zero() {
            return Err(Error::Config {
                message: "transfer TTL must be greater than zero".to_string(),
                key: Some("transfer.ttl".to_string()),
            });
        }

        if self.transfer.sweep_interval.is_zero() {
            return Err(Error::Config {
                message: "sweep interval must be greater than zero".to_string(),
                key: Some("transfer.sweep_interval".to_string()),
            });
        }

        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!("backoff multiplier must be a finite value >= 1.0, got {}", multiplier),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::Config {
                message: format!(
                    "retry base delay {:?} exceeds max delay {:?}",
                    self.retry.base_delay, self.retry.max_delay
                ),
                key: Some("retry.base_delay".to_string()),
            });
        }

        Ok(())
    }

    /// True when a vendor API token is present
    pub fn is_vendor_configured(&self) -> bool {
        self.vendor
            .api_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// True when an Akool API key is present
    pub fn is_akool_configured(&self) -> bool {
        self.akool
            .api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }
}

/// Akool face swap API configuration
///
/// Akool authenticates with a client id and API key exchanged for a bearer
/// token, which is cached and refreshed every `token_refresh`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AkoolConfig {
    /// Base URL of the Akool open API (default: "https://openapi.akool.com")
    #[serde(default = "default_akool_base_url")]
    pub base_url: String,

    /// Base URL of the Akool face detection service (default: "https://sg3.akool.com")
    #[serde(default = "default_akool_detect_url")]
    pub detect_url: String,

    /// Client id used to obtain a token
    #[serde(default)]
    pub client_id: Option<String>,

    /// API key (client secret) used to obtain a token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_akool_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// How long a fetched token is reused before fetching a new one (default: 24 hours)
    #[serde(default = "default_akool_token_refresh", with = "duration_ms_serde")]
    pub token_refresh: Duration,
}

impl Default for AkoolConfig {
    fn default() -> Self {
        Self {
            base_url: default_akool_base_url(),
            detect_url: default_akool_detect_url(),
            client_id: None,
            api_key: None,
            request_timeout: default_akool_request_timeout(),
            token_refresh: default_akool_token_refresh(),
        }
    }
}

/// Vendor task API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Base URL of the vendor API (default: "https://api.vmodel.ai")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// Model version used for video face detection tasks
    #[serde(default = "default_detect_version")]
    pub detect_version: String,

    /// Model version used for multi-face swap tasks
    #[serde(default = "default_swap_version")]
    pub swap_version: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout: default_request_timeout(),
            detect_version: default_detect_version(),
            swap_version: default_swap_version(),
        }
    }
}

/// Retry configuration for transient failures
///
/// Only idempotent (GET) vendor calls are retried. The delay before retry
/// `n` is `min(max_delay, base_delay * backoff_multiplier^(n-1))`, plus up to
/// a quarter of that delay as jitter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3, so 4 attempts total)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 500 ms)
    #[serde(default = "default_base_delay", with = "duration_ms_serde")]
    pub base_delay: Duration,

    /// Upper bound for the pre-jitter delay (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
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
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Task polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Fixed interval between status queries (default: 2 seconds)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub interval: Duration,

    /// Deadline for synchronous face detection (default: 120 seconds)
    #[serde(default = "default_detect_timeout", with = "duration_ms_serde")]
    pub detect_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            detect_timeout: default_detect_timeout(),
        }
    }
}

/// Result transfer cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Age after which an entry is evicted regardless of status (default: 24 hours)
    #[serde(default = "default_transfer_ttl", with = "duration_ms_serde")]
    pub ttl: Duration,

    /// Period of the background eviction sweep (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_ms_serde")]
    pub sweep_interval: Duration,

    /// Storage key prefix for mirrored artifacts (default: "results")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Extension appended to mirrored artifact keys (default: ".mp4")
    #[serde(default = "default_key_extension")]
    pub key_extension: String,

    /// Content type recorded for mirrored artifacts (default: "video/mp4")
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ttl: default_transfer_ttl(),
            sweep_interval: default_sweep_interval(),
            key_prefix: default_key_prefix(),
            key_extension: default_key_extension(),
            content_type: default_content_type(),
        }
    }
}

/// Local filesystem storage configuration
///
/// Used when no object storage is configured. Files land under `local_dir`
/// and are addressed as `{public_prefix}/{key}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for stored files (default: "./uploads")
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// URL path prefix under which stored files are served (default: "/uploads")
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,

    /// Timeout for downloading remote artifacts (default: 5 minutes)
    #[serde(default = "default_download_timeout", with = "duration_ms_serde")]
    pub download_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            public_prefix: default_public_prefix(),
            download_timeout: default_download_timeout(),
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn default_base_url() -> String {
    "https://api.vmodel.ai".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_detect_version() -> String {
    "fa9317a2ad086f7633f4f9b38f35c82495b6c5f38fa2afbe32d9d9df8620b389".to_string()
}

fn default_swap_version() -> String {
    "8e960283784c5b58e5f67236757c40bb6796c85e3c733d060342bdf62f9f0c64".to_string()
}

fn default_akool_base_url() -> String {
    "https://openapi.akool.com".to_string()
}

fn default_akool_detect_url() -> String {
    "https://sg3.akool.com".to_string()
}

fn default_akool_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_akool_token_refresh() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_detect_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_transfer_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_key_prefix() -> String {
    "results".to_string()
}

fn default_key_extension() -> String {
    ".mp4".to_string()
}

fn default_content_type() -> String {
    "video/mp4".to_string()
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_public_prefix() -> String {
    "/uploads".to_string()
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

// Durations are written as whole milliseconds
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
