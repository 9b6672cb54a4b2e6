//! Subscriber setup for the binary
//!
//! Events go to stdout and to the configured log file. The filter comes from
//! `--log-level` when given, then `RUST_LOG`, then the config default.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::snapshot::ensure_dir;

/// Install the global subscriber. Keep the guard alive until exit so the
/// file writer gets flushed.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> Result<WorkerGuard> {
    let filter = build_filter(level_override, &config.level)?;
    let (file_writer, guard) = open_log_file(&config.log_file)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn build_filter(level_override: Option<&str>, default_level: &str) -> Result<EnvFilter> {
    if let Some(level) = level_override {
        return EnvFilter::try_new(level).context(format!("Invalid log level: {}", level));
    }

    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .context(format!("Invalid log level: {}", default_level)),
    }
}

/// Non-blocking writer appending to `path`; its directory is created first
pub fn open_log_file(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;

    let file_name = path
        .file_name()
        .context(format!("Log file path has no file name: {:?}", path))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .context(format!("Failed to open log file {:?}", path))?;

    Ok(tracing_appender::non_blocking(appender))
}
