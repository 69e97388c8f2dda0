// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a replication run.
//!
//! Configuration is built from three layers, later layers winning:
//!
//! 1. Built-in defaults ([`SyncConfig::default()`])
//! 2. An optional JSON file named by `BUCKET_SYNC_CONFIG`
//! 3. `BUCKET_SYNC_*` environment variables
//!
//! # Configuration Structure
//!
//! ```text
//! SyncConfig
//! ├── source: SourceConfig          # Bucket to read from
//! │   ├── endpoint: StoreEndpoint   # host, bucket, admin, password
//! │   ├── index_name / query_name   # Index that enumerates keys
//! ├── destination: StoreEndpoint    # Bucket to write to
//! ├── logging: LoggingConfig        # Log dir/file, level, rotation
//! ├── settings: SyncSettings        # Limits, timeouts, pool size
//! └── lock_path: Option<String>     # Run-exclusivity lock file
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source": {
//!     "endpoint": { "host": "10.0.0.2", "bucket": "frombucket", "admin": "admin" },
//!     "index_name": "dev_sync",
//!     "query_name": "all"
//!   },
//!   "destination": { "host": "10.0.0.1", "bucket": "tobucket", "admin": "Administrator" },
//!   "logging": { "dir": "log", "file_name": "bucket_sync.log", "level": "info" },
//!   "settings": { "query_limit": 100000, "concurrency": 4 }
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::resilience::{RateLimitConfig, RetryConfig};
use crate::telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "BUCKET_SYNC_CONFIG";

/// Prefix shared by all environment overrides.
pub const ENV_PREFIX: &str = "BUCKET_SYNC_";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bucket documents are read from, and the index used to find them.
    #[serde(default)]
    pub source: SourceConfig,

    /// Bucket documents are written to.
    #[serde(default = "default_destination")]
    pub destination: StoreEndpoint,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub settings: SyncSettings,

    /// Lock file guarding against concurrent runs.
    /// Defaults to `bucket-sync.lock` in the system temp directory.
    #[serde(default)]
    pub lock_path: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            destination: default_destination(),
            logging: LoggingConfig::default(),
            settings: SyncSettings::default(),
            lock_path: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            SyncError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Apply `BUCKET_SYNC_*` overrides. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |suffix: &str| -> Option<String> {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(v) = get("FROM_HOST") {
            self.source.endpoint.host = v;
        }
        if let Some(v) = get("FROM_BUCKET") {
            self.source.endpoint.bucket = v;
        }
        if let Some(v) = get("FROM_ADMIN") {
            self.source.endpoint.admin = v;
        }
        if let Some(v) = get("FROM_PASSWORD") {
            self.source.endpoint.password = Some(v);
        }
        if let Some(v) = get("FROM_INDEX") {
            self.source.index_name = v;
        }
        if let Some(v) = get("FROM_QUERY") {
            self.source.query_name = v;
        }

        if let Some(v) = get("TO_HOST") {
            self.destination.host = v;
        }
        if let Some(v) = get("TO_BUCKET") {
            self.destination.bucket = v;
        }
        if let Some(v) = get("TO_ADMIN") {
            self.destination.admin = v;
        }
        if let Some(v) = get("TO_PASSWORD") {
            self.destination.password = Some(v);
        }

        if let Some(v) = get("LOG_DIR") {
            self.logging.dir = v;
        }
        if let Some(v) = get("LOG_FILE") {
            self.logging.file_name = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.parse().map_err(SyncError::Config)?;
        }
        if let Some(v) = get("LOG_MAX_BYTES") {
            self.logging.max_bytes = parse_number("LOG_MAX_BYTES", &v)?;
        }
        if let Some(v) = get("LOG_MAX_FILES") {
            self.logging.max_files = parse_number("LOG_MAX_FILES", &v)?;
        }
        if let Some(v) = get("LOG_STDERR") {
            self.logging.stderr = parse_bool("LOG_STDERR", &v)?;
        }

        if let Some(v) = get("QUERY_LIMIT") {
            self.settings.query_limit = parse_number("QUERY_LIMIT", &v)?;
        }
        if let Some(v) = get("PAGE_SIZE") {
            self.settings.page_size = parse_number("PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("REQUIRE_FRESH_INDEX") {
            self.settings.require_fresh_index = parse_bool("REQUIRE_FRESH_INDEX", &v)?;
        }
        if let Some(v) = get("CONCURRENCY") {
            self.settings.concurrency = parse_number("CONCURRENCY", &v)?;
        }
        if let Some(v) = get("OPERATION_TIMEOUT") {
            self.settings.operation_timeout = v;
        }
        if let Some(v) = get("LOCK_PATH") {
            self.lock_path = Some(v);
        }

        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source host", &self.source.endpoint.host),
            ("source bucket", &self.source.endpoint.bucket),
            ("source index name", &self.source.index_name),
            ("source query name", &self.source.query_name),
            ("destination host", &self.destination.host),
            ("destination bucket", &self.destination.bucket),
            ("log file name", &self.logging.file_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{name} must not be empty")));
            }
        }

        if self.settings.query_limit == 0 {
            return Err(SyncError::Config("query_limit must be at least 1".into()));
        }
        if self.settings.page_size == 0 {
            return Err(SyncError::Config("page_size must be at least 1".into()));
        }
        if self.settings.concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".into()));
        }
        if self.settings.connect_attempts == 0 {
            return Err(SyncError::Config("connect_attempts must be at least 1".into()));
        }
        for (name, value) in [
            ("operation_timeout", &self.settings.operation_timeout),
            ("connect_timeout", &self.settings.connect_timeout),
        ] {
            match humantime::parse_duration(value) {
                Ok(duration) if duration.is_zero() => {
                    return Err(SyncError::Config(format!("{name} must be greater than zero")));
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(SyncError::Config(format!("{name} '{value}' is not a duration")));
                }
            }
        }
        Ok(())
    }

    /// Resolved path of the run-exclusivity lock file.
    pub fn lock_path(&self) -> PathBuf {
        match &self.lock_path {
            Some(path) => PathBuf::from(path),
            None => std::env::temp_dir().join("bucket-sync.lock"),
        }
    }

    /// Create a config for testing: fast timeouts, no stderr mirror.
    pub fn for_testing(log_dir: &Path, lock_path: &Path) -> Self {
        let mut config = Self::default();
        config.logging.dir = log_dir.display().to_string();
        config.logging.stderr = false;
        config.settings.operation_timeout = "2s".to_string();
        config.settings.connect_timeout = "500ms".to_string();
        config.settings.connect_attempts = 1;
        config.lock_path = Some(lock_path.display().to_string());
        config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store endpoints
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a bucket lives and who to authenticate as.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreEndpoint {
    /// `host` or `host:port`.
    pub host: String,

    /// Bucket (key namespace) on that host.
    pub bucket: String,

    /// Administrative identity used to authenticate.
    #[serde(default)]
    pub admin: String,

    /// Password for `admin`. Without one the connection is unauthenticated.
    #[serde(default)]
    pub password: Option<String>,
}

impl StoreEndpoint {
    pub fn new(host: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            bucket: bucket.into(),
            admin: String::new(),
            password: None,
        }
    }
}

// Keeps passwords out of logs and panics.
impl std::fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("host", &self.host)
            .field("bucket", &self.bucket)
            .field("admin", &self.admin)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Source bucket plus the index that enumerates its keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_endpoint")]
    pub endpoint: StoreEndpoint,

    /// Index (design document / view) holding the candidate keys.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Query within the index. Expected to emit one row per document id.
    #[serde(default = "default_query_name")]
    pub query_name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            index_name: default_index_name(),
            query_name: default_query_name(),
        }
    }
}

fn default_source_endpoint() -> StoreEndpoint {
    StoreEndpoint {
        host: "127.0.0.2".to_string(),
        bucket: "frombucket".to_string(),
        admin: "admin".to_string(),
        password: None,
    }
}

fn default_destination() -> StoreEndpoint {
    StoreEndpoint {
        host: "127.0.0.1".to_string(),
        bucket: "tobucket".to_string(),
        admin: "Administrator".to_string(),
        password: None,
    }
}

fn default_index_name() -> String {
    "dev_sync".to_string()
}

fn default_query_name() -> String {
    "all".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncSettings: limits, timeouts, worker pool
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum keys taken from the index in one run.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,

    /// Keys requested per index page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Ask the store to bring the index up to date before answering.
    #[serde(default = "default_true")]
    pub require_fresh_index: bool,

    /// Keys replicated at once. 1 keeps strict index order.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for each store call (e.g. "30s").
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: String,

    /// Connection attempts per store before the run gives up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,

    /// Deadline for each connection attempt (e.g. "10s").
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Throttle per-key work.
    #[serde(default)]
    pub rate_limit_enabled: bool,

    /// Keys per second when throttled.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst allowance when throttled.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_query_limit() -> usize {
    100_000
}

fn default_page_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_operation_timeout() -> String {
    "30s".to_string()
}

fn default_connect_attempts() -> usize {
    3
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_rate_limit_per_sec() -> u32 {
    1000
}

fn default_rate_limit_burst() -> u32 {
    100
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            query_limit: default_query_limit(),
            page_size: default_page_size(),
            require_fresh_index: true,
            concurrency: default_concurrency(),
            operation_timeout: default_operation_timeout(),
            connect_attempts: default_connect_attempts(),
            connect_timeout: default_connect_timeout(),
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl SyncSettings {
    /// Parsed per-operation deadline. Falls back to 30 seconds.
    pub fn operation_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.operation_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Parsed per-attempt connection deadline. Falls back to 10 seconds.
    pub fn connect_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Retry policy for opening store connections.
    pub fn connect_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.connect_attempts,
            connection_timeout: self.connect_timeout_duration(),
            ..RetryConfig::default()
        }
    }

    /// Rate limit configuration, `None` if throttling is disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| SyncError::Config(format!("invalid {ENV_PREFIX}{name} '{raw}': {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::Config(format!(
            "invalid {ENV_PREFIX}{name} '{raw}': expected true or false"
        ))),
    }
}
