//! Logging setup for applications embedding the heap
//!
//! The allocator only emits `tracing` events; installing a subscriber is the
//! host's choice. This module provides a ready-made one built on
//! `tracing-subscriber`, with human or JSON console output and an optional
//! JSON log file.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full tracing filter (e.g. "info,placeheap=trace"), wins over the rest
//! - `PLACEHEAP_LOG_LEVEL`: error, warn, info, debug or trace
//! - `PLACEHEAP_LOG_FORMAT`: "human" or "json"
//! - `PLACEHEAP_LOG_FILE`: path of a JSON log file written next to the console output

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "PLACEHEAP_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "PLACEHEAP_LOG_FORMAT";
const LOG_FILE_ENV: &str = "PLACEHEAP_LOG_FILE";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("cannot open log file {path}: {reason}")]
    FileOpenFailed { path: PathBuf, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLogLevel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include source file and line in console output
    pub with_file_info: bool,
    /// Also write JSON lines to this file
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Read `PLACEHEAP_LOG_*` variables on top of the defaults
    ///
    /// Unset or empty variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self, LoggingError> {
        let mut config = Self::default();

        if let Some(level) = env_value(LOG_LEVEL_ENV) {
            config.level = level.parse()?;
        }
        if let Some(format) = env_value(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Some(file) = env_value(LOG_FILE_ENV) {
            config.log_file = Some(PathBuf::from(file));
        }

        Ok(config)
    }

    /// `RUST_LOG` when set, the configured level otherwise
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match env_value("RUST_LOG") {
            Some(filter) => {
                EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
            }
            None => Ok(EnvFilter::new(self.level.as_filter_str())),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Install the subscriber described by the environment, ignoring failures
///
/// Idempotent. Meant for binaries and tests that just want output.
pub fn init_logging_default() {
    if let Err(err) = init_logging_from_env() {
        eprintln!("placeheap: logging not initialized: {}", err);
    }
}

/// Install the subscriber described by the environment
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_with_config(&LoggingConfig::from_env()?)
}

/// Install a subscriber for `config`
///
/// Only the first successful call installs anything; later calls return
/// `Ok(())` without touching the global subscriber.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    TRACING_INITIALIZED
        .get_or_try_init(|| install(config))
        .map(|_| ())
}

pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;

    let console = match config.format {
        LogFormat::Human => fmt::layer()
            .with_target(true)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .boxed(),
    };

    let file = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(open_log_file(path)?)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let failed = |e: std::io::Error| LoggingError::FileOpenFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(failed)
}
