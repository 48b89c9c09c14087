//! Structured Logging for the media importer
//!
//! This module provides functionality for:
//! 1. Terminal and rolling-file output through one tracing subscriber
//! 2. JSON or line formatting for the file output
//! 3. Per-stage log helpers that keep field names consistent across workers

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt::{self, time::ChronoUtc}, prelude::*};

use crate::importer::Logging;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Name of the rolling log file.
pub const LOG_FILE_NAME: &str = "media_importer.log";

/// Pipeline stage a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Duplicates,
    Conversion,
    Import,
    Routing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Validation => write!(f, "validation"),
            Stage::Duplicates => write!(f, "duplicates"),
            Stage::Conversion => write!(f, "conversion"),
            Stage::Import => write!(f, "import"),
            Stage::Routing => write!(f, "routing"),
        }
    }
}

/// Owns the background writer of the file layer; logs are flushed when dropped.
pub struct Logger {
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Install the global subscriber described by the logging section.
    pub fn init(settings: &Logging, log_dir: &Path) -> LoggerResult<Self> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&settings.log_level))
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        let terminal_layer = settings.log_to_terminal.then(|| {
            fmt::layer()
                .with_target(false)
                .with_timer(ChronoUtc::rfc_3339())
                .boxed()
        });

        let (file_layer, guard) = if settings.log_to_file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir)?;
            }
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = match settings.log_format.as_str() {
                "json" => fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_timer(ChronoUtc::rfc_3339())
                    .boxed(),
                _ => fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_timer(ChronoUtc::rfc_3339())
                    .boxed(),
            };
            (Some(layer), Some(guard))
        } else {
            (None, None)
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(terminal_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = settings.log_format.as_str(),
            log_level = settings.log_level.as_str(),
            log_to_file = settings.log_to_file,
            "Logger initialized"
        );

        Ok(Self {
            log_dir: settings.log_to_file.then(|| log_dir.to_path_buf()),
            _guard: guard,
        })
    }

    /// Directory the rolling file is written to, when file output is on.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Log a per-file stage failure that routes the file to the failed tree.
pub fn log_stage_failure(stage: Stage, path: &Path, reason: &str) {
    warn!(
        stage = %stage,
        file = %path.display(),
        reason = reason,
        "File failed at {}", stage
    );
}

/// Log an action that dry-run mode suppressed.
pub fn log_dry_run(stage: Stage, action: &str) {
    info!(stage = %stage, "[Dry Run] Would {}", action);
}

/// Log an error that escaped a file's pipeline.
pub fn log_unexpected(path: &Path, details: &str) {
    error!(
        file = %path.display(),
        details = details,
        "Unexpected error while processing file"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_names_are_lowercase() {
        assert_eq!(Stage::Validation.to_string(), "validation");
        assert_eq!(Stage::Routing.to_string(), "routing");
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let settings = Logging {
            log_level: "debug".to_string(),
            log_format: "json".to_string(),
            log_to_terminal: false,
            log_to_file: true,
        };

        // Only one global subscriber per process; a second init reports an error instead.
        match Logger::init(&settings, &log_dir) {
            Ok(logger) => assert_eq!(logger.log_dir(), Some(log_dir.as_path())),
            Err(e) => assert!(matches!(e, LoggerError::Logging(_))),
        }
        assert!(log_dir.is_dir());
    }
}
