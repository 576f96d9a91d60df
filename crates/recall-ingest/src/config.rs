//! Configuration management
//!
//! Every group loads from environment variables (after `.env` is read by
//! [`Config::load`]) and falls back to the `DEFAULT_*` constants below.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

// ============================================================================
// Source Configuration Constants
// ============================================================================

/// Default openFDA device recall endpoint.
pub const DEFAULT_SOURCE_URL: &str = "https://api.fda.gov/device/recall.json";

/// Default number of records requested per page (openFDA maximum).
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Default offset ceiling; openFDA rejects deeper `skip` values.
pub const DEFAULT_MAX_OFFSET: u32 = 10_000;

/// Default number of consecutive failed page requests before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default base delay between a failed request and the next one.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Start date used when the store holds no dated recall.
pub const DEFAULT_START_DATE: &str = "2024-01-01";

// ============================================================================
// Notifier Configuration Constants
// ============================================================================

/// Default timeout for the inventory cross-reference call in seconds.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/recalls";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Schedule and Server Configuration Constants
// ============================================================================

/// Default interval between scheduled runs (daily).
pub const DEFAULT_INGEST_INTERVAL_SECS: u64 = 86_400;

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub notifier: NotifierConfig,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
}

/// Recall source API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub page_size: u32,
    pub max_offset: u32,
    pub max_consecutive_failures: u32,
    pub request_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    /// openFDA API key; raises the anonymous rate limit when set
    pub api_key: Option<String>,
    pub default_start_date: NaiveDate,
    /// JSON field-mapping table overriding the built-in one
    pub field_mapping_path: Option<PathBuf>,
}

/// Inventory cross-reference endpoint configuration
///
/// No URL means notification is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Interval scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub cors_allowed_origins: Vec<String>,
}

/// Read and parse an environment variable, falling back on absence or
/// parse failure.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Optional string variable; blank values count as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 2024-01-01, the first day the default window covers.
pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl Config {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            source: SourceConfig::from_env()?,
            notifier: NotifierConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            schedule: ScheduleConfig::from_env()?,
            server: ServerConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate every group
    pub fn validate(&self) -> anyhow::Result<()> {
        self.source.validate()?;
        self.notifier.validate()?;
        self.database.validate()?;
        self.schedule.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

impl SourceConfig {
    /// Load source configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let default_start_date = match env_opt("RECALL_DEFAULT_START_DATE") {
            Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                anyhow::anyhow!("RECALL_DEFAULT_START_DATE must be YYYY-MM-DD, got {raw}: {e}")
            })?,
            None => default_start_date(),
        };

        let config = Self {
            base_url: env_opt("RECALL_SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            page_size: env_or("RECALL_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            max_offset: env_or("RECALL_MAX_OFFSET", DEFAULT_MAX_OFFSET),
            max_consecutive_failures: env_or(
                "RECALL_MAX_CONSECUTIVE_FAILURES",
                DEFAULT_MAX_CONSECUTIVE_FAILURES,
            ),
            request_timeout_secs: env_or("RECALL_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_backoff_ms: env_or("RECALL_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
            api_key: env_opt("RECALL_API_KEY"),
            default_start_date,
            field_mapping_path: env_opt("RECALL_FIELD_MAPPING_PATH").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate source configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("RECALL_SOURCE_URL must be an http(s) URL, got: {}", self.base_url);
        }
        if self.page_size == 0 {
            anyhow::bail!("RECALL_PAGE_SIZE must be greater than 0");
        }
        if self.max_offset < self.page_size {
            anyhow::bail!(
                "RECALL_MAX_OFFSET ({}) must be at least RECALL_PAGE_SIZE ({})",
                self.max_offset,
                self.page_size
            );
        }
        if self.max_consecutive_failures == 0 {
            anyhow::bail!("RECALL_MAX_CONSECUTIVE_FAILURES must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("RECALL_REQUEST_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get retry backoff base as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl NotifierConfig {
    /// Load notifier configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            url: env_opt("NOTIFY_URL"),
            api_key: env_opt("NOTIFY_API_KEY"),
            api_secret: env_opt("NOTIFY_API_SECRET"),
            timeout_secs: env_or("NOTIFY_TIMEOUT_SECS", DEFAULT_NOTIFY_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate notifier configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("NOTIFY_URL must be an http(s) URL, got: {url}");
            }
        }
        if self.api_key.is_some() != self.api_secret.is_some() {
            anyhow::bail!("NOTIFY_API_KEY and NOTIFY_API_SECRET must be set together");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("NOTIFY_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    /// Whether a downstream endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Get notify timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DatabaseConfig {
    /// Load database configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            url: env_opt("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: env_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
            idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if self.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.min_connections > self.max_connections {
            anyhow::bail!(
                "DATABASE_MIN_CONNECTIONS ({}) cannot exceed DATABASE_MAX_CONNECTIONS ({})",
                self.min_connections,
                self.max_connections
            );
        }
        Ok(())
    }
}

impl ScheduleConfig {
    /// Load schedule configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            enabled: env_or("INGEST_SCHEDULE_ENABLED", false),
            interval_secs: env_or("INGEST_INTERVAL_SECS", DEFAULT_INGEST_INTERVAL_SECS),
            initial_delay_secs: env_or("INGEST_INITIAL_DELAY_SECS", 0),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate schedule configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.interval_secs == 0 {
            anyhow::bail!("INGEST_INTERVAL_SECS must be greater than 0");
        }
        Ok(())
    }

    /// Get the run interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the delay before the first scheduled run as Duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            host: env_opt("RECALL_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
            port: env_or("RECALL_PORT", DEFAULT_SERVER_PORT),
            shutdown_timeout_secs: env_or("RECALL_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate server configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("RECALL_HOST cannot be empty");
        }
        if self.port == 0 {
            anyhow::bail!("RECALL_PORT must be greater than 0");
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_offset: DEFAULT_MAX_OFFSET,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            api_key: None,
            default_start_date: default_start_date(),
            field_mapping_path: None,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_secret: None,
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: DEFAULT_INGEST_INTERVAL_SECS,
            initial_delay_secs: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            cors_allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
        }
    }
}
