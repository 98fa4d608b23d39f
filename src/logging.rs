// src/logging.rs
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Maps the configured level name to a tracing directive.
pub fn parse_level(level: &str) -> Result<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARNING" | "WARN" => Ok("warn"),
        "ERROR" => Ok("error"),
        other => Err(anyhow!(
            "Configuration error: unknown log level '{}' (expected DEBUG, INFO, WARNING or ERROR)",
            other
        )),
    }
}

/// Splits a configured log path into the directory and file name prefix
/// the hourly roller writes under.
fn rolling_target(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Log file path {} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// With a log file configured, output rolls over hourly and is written off
/// the calling thread; the returned guard must be held until exit so
/// buffered lines are flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_level(&config.level)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.file {
        Some(path) => {
            let (dir, file_name) = rolling_target(path)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix(file_name)
                .build(&dir)
                .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            let colour = std::env::var("TERM")
                .map(|term| term.contains("xterm"))
                .unwrap_or(false);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_ansi(colour)
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(None)
        }
    }
}
