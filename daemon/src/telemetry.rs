//! Logging setup for the daemon
//!
//! Installs a `tracing` registry with:
//! - An `EnvFilter` (`RUST_LOG` wins over the configured level)
//! - A console layer
//! - An optional file layer written through a non-blocking appender,
//!   plain text or JSON, with a rolling policy

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to stdout
    #[serde(default = "default_console")]
    pub console: bool,
    /// Log file; no file logging when unset
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// When to start a new log file
    #[serde(default)]
    pub rotation: LogRotation,
    /// Write the log file as JSON lines
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: default_console(),
            file_path: None,
            rotation: LogRotation::default(),
            json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_console() -> bool { true }

/// Keeps the file writer alive; dropping it flushes pending lines
pub struct Telemetry {
    _file_guard: Option<WorkerGuard>,
}

pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" => Some(tracing::Level::WARN),
        "error" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

/// Default filter directives when `RUST_LOG` is not set
fn default_directives(level: tracing::Level) -> String {
    let level = level.to_string().to_lowercase();
    format!("folder_replica={level},replica_sync={level}")
}

fn file_appender(path: &Path, rotation: LogRotation) -> rolling::RollingFileAppender {
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| OsStr::new("folder-replica.log"));

    match rotation {
        LogRotation::Never => rolling::never(directory, file_name),
        LogRotation::Daily => rolling::daily(directory, file_name),
        LogRotation::Hourly => rolling::hourly(directory, file_name),
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(config: &LoggingConfig) -> Result<Telemetry> {
    let level = parse_level(&config.level).unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    let (json_layer, text_layer, guard) = match &config.file_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }

            let (writer, guard) = tracing_appender::non_blocking(file_appender(path, config.rotation));
            if config.json {
                let layer = fmt::layer()
                    .with_writer(writer)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                (Some(layer), None, Some(guard))
            } else {
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (None, Some(layer), Some(guard))
            }
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(
        level = %level,
        log_file = ?config.file_path,
        "Logging initialized"
    );

    Ok(Telemetry { _file_guard: guard })
}
