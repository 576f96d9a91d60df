//! Tracing setup shared by the recall binaries
//!
//! One call to [`init_logging`] installs the global subscriber: console
//! and/or a daily rolling file, text or JSON lines. Settings come from code
//! defaults overlaid with `LOG_*` environment variables:
//!
//! | Variable | Values |
//! |---|---|
//! | `LOG_LEVEL` | trace, debug, info, warn, error |
//! | `LOG_OUTPUT` | console, file, both |
//! | `LOG_FORMAT` | text, json |
//! | `LOG_DIR` | directory for rolling files |
//! | `LOG_FILE_PREFIX` | rolling file name prefix |
//! | `LOG_FILTER` | extra comma-separated directives |
//! | `LOG_INCLUDE_LOCATION` | true/false |
//! | `LOG_INCLUDE_THREAD_IDS` | true/false |
//!
//! Pipeline code logs with fields rather than interpolated values:
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! info!(offset = 2000, returned = 1000, "Received recall page");
//! warn!(offset = 3000, attempt = 2, "Recall page request failed");
//! ```
//!
//! ```no_run
//! use recall_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::for_binary("recall-ingest")
//!         .with_level(LogLevel::Debug)
//!         .merge_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("Recall ingestion starting");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive form accepted by `EnvFilter`
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(anyhow!("Invalid log level: {other}")),
        }
    }
}

/// Where events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(anyhow!("Invalid log output: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("Invalid log format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    pub log_dir: PathBuf,
    /// Rolling files are named `{prefix}.{YYYY-MM-DD}`
    pub file_prefix: String,
    /// Per-target directives, e.g. `sqlx=warn`
    pub directives: Vec<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_binary("recall-ingest")
    }
}

impl LogConfig {
    /// Console text logging at info, files prefixed with `name`
    pub fn for_binary(name: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            file_prefix: name.into(),
            directives: Vec::new(),
            include_location: false,
            include_thread_ids: false,
        }
    }

    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Append comma-separated directives
    pub fn with_directives(mut self, directives: &str) -> Self {
        self.directives.extend(split_directives(directives));
        self
    }

    /// Overlay `LOG_*` variables; unset variables keep the current value
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env_parse("LOG_LEVEL")? {
            self.level = level;
        }
        if let Some(output) = env_parse("LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = env_parse("LOG_FORMAT")? {
            self.format = format;
        }
        if let Some(dir) = env_parse::<PathBuf>("LOG_DIR")? {
            self.log_dir = dir;
        }
        if let Some(prefix) = env_parse("LOG_FILE_PREFIX")? {
            self.file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            self.directives.extend(split_directives(&filter));
        }
        if let Some(location) = env_parse("LOG_INCLUDE_LOCATION")? {
            self.include_location = location;
        }
        if let Some(thread_ids) = env_parse("LOG_INCLUDE_THREAD_IDS")? {
            self.include_thread_ids = thread_ids;
        }
        Ok(self)
    }

    /// `RUST_LOG` first, then the base level, then the configured directives
    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(
                self.level
                    .as_directive()
                    .parse()
                    .context("Invalid log level directive")?,
            )
            .from_env_lossy();
        for directive in &self.directives {
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Invalid log filter directive '{directive}'"))?,
            );
        }
        Ok(filter)
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_thread_ids(self.include_thread_ids)
            .with_span_events(FmtSpan::CLOSE);

        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

fn split_directives(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {name}={raw}: {e}")),
        _ => Ok(None),
    }
}

/// Flushes the file writer when dropped; keep it alive in `main`
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if matches!(config.output, LogOutput::Console | LogOutput::Both) {
        layers.push(config.layer(std::io::stdout, true));
    }
    if matches!(config.output, LogOutput::File | LogOutput::Both) {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(config.layer(writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(config.env_filter()?)
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: file_guard })
}
