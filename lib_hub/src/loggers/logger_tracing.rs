//! Console plus daily-rotated JSON file logging.
//!
//! `RUST_LOG` wins over the configured level when it is set, so a single
//! module can be turned up without touching the config file.

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::HubError;

/// File name prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "server_hub";

/// Maps a configured level to a filter directive. Unknown names fall back to `info`.
pub fn level_directive(log_level: &str) -> &'static str {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// Builds the rolling file writer, creating `log_dir` if needed. Only the
/// newest `max_files` files are kept.
pub fn file_appender(log_dir: &Path, max_files: usize) -> Result<RollingFileAppender, HubError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(log_dir)
        .map_err(|e| HubError::Config(format!("cannot open log file in {}: {e}", log_dir.display())))
}

/// Wraps the rolling file in a background writer thread.
pub fn file_writer(log_dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard), HubError> {
    Ok(tracing_appender::non_blocking(file_appender(log_dir, max_files)?))
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn setup_logging(log_dir: &Path, log_level: &str, max_files: usize) -> Result<WorkerGuard, HubError> {
    let (writer, guard) = file_writer(log_dir, max_files)?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level_directive(log_level)))
        .map_err(|e| HubError::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HubError::Config(format!("logging already initialized: {e}")))?;

    tracing::info!("Logging initialized with level: {}", level_directive(log_level));
    Ok(guard)
}
