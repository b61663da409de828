//! Structured logging setup for the simulator and embedding applications.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the binary. Two streams are supported:
//! - stdout, in pretty, compact or JSON format
//! - an optional daily-rolling JSON file under `log_dir`
//!
//! # Targets
//!
//! | Target | Description |
//! |--------|-------------|
//! | `neural_ts::bandit::agent` | Arm selection, confidence failures |
//! | `neural_ts::bandit::trainer` | Retraining progress and loss |
//! | `neural_ts::simulation` | Episode progress |
//!
//! ```bash
//! # Per-epoch loss while keeping the rest at info
//! RUST_LOG=info,neural_ts::bandit::trainer=debug cargo run --bin nts_sim
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,

    /// Format for stdout logging
    #[serde(default)]
    pub stdout_format: LogFormat,

    /// Directory for the rolling JSON log file. No file logging when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Level for the file stream
    #[serde(default = "default_file_level")]
    pub file_level: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            stdout_format: LogFormat::default(),
            log_dir: None,
            file_level: default_file_level(),
        }
    }
}

impl LogConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.stdout_format = format;
        self
    }

    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    /// Stdout filter: `RUST_LOG` wins over the configured level.
    fn stdout_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber.
///
/// The returned guard, when present, flushes the file stream on drop and must
/// be held for the life of the program. Fails if a global subscriber is
/// already installed.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let stdout_filter = config.stdout_filter();

    let Some(log_dir) = config.log_dir.as_ref() else {
        match config.stdout_format {
            LogFormat::Json => tracing_subscriber::fmt()
                .with_env_filter(stdout_filter)
                .json()
                .try_init()?,
            LogFormat::Compact => tracing_subscriber::fmt()
                .with_env_filter(stdout_filter)
                .compact()
                .try_init()?,
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(stdout_filter)
                .with_target(false)
                .try_init()?,
        }
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "nts.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .json()
        .with_filter(EnvFilter::new(&config.file_level));

    match config.stdout_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt::layer().json().with_filter(stdout_filter))
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt::layer().compact().with_filter(stdout_filter))
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt::layer().with_target(false).with_filter(stdout_filter))
            .try_init()?,
    }

    eprintln!("File logging enabled: {}", log_dir.display());
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.file_level, "debug");
        assert_eq!(config.stdout_format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::default()
            .with_format(LogFormat::Compact)
            .with_log_dir(PathBuf::from("/tmp/nts"));
        assert_eq!(config.stdout_format, LogFormat::Compact);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/nts")));
    }

    #[test]
    fn test_log_config_serde_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"stdout_format": "json"}"#).unwrap();
        assert_eq!(config.stdout_format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_second_init_reports_error() {
        let config = LogConfig::default().with_format(LogFormat::Compact);
        // the global subscriber is set at most once per process
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");

        let parsed: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(parsed, LogFormat::Compact);
    }
}
