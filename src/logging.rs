//! # Structured Logging Module
//!
//! Console logging plus an optional JSON file log, rolled daily, in the configured
//! log directory.

use std::fs;
use std::path::Path;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::config::loader::expand_home;

const LOG_FILE_PREFIX: &str = "runbook-agent.log";
const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging once per process. Later calls are no-ops.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = effective_level(&config.level);
        let filter = || {
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|directives| EnvFilter::try_new(directives).ok())
                .unwrap_or_else(|| EnvFilter::new(&level))
        };

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(filter());

        let (file_layer, guard, file_error) = match config.directory.as_deref() {
            Some(directory) => match file_writer(&expand_home(directory)) {
                Ok((writer, guard)) => {
                    let layer = fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(filter());
                    (Some(layer), Some(guard), None)
                }
                Err(e) => (None, None, Some(e)),
            },
            None => (None, None, None),
        };

        // A subscriber installed by the embedding process wins
        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        if let Some(e) = file_error {
            tracing::warn!("⚠️ Could not open log directory, logging to console only: {}", e);
        }
        tracing::info!(
            pid = process::id(),
            level = %level,
            directory = config.directory.as_deref().unwrap_or("-"),
            "🔧 STRUCTURED LOGGING: Initialized"
        );

        guard
    });
}

fn file_writer(
    directory: &Path,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(directory)?;
    let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Configured level, lowercased; unknown levels fall back to `info`
fn effective_level(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let level = if level == "warning" { "warn".to_string() } else { level };
    if VALID_LEVELS.contains(&level.as_str()) {
        level
    } else {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level("DEBUG"), "debug");
        assert_eq!(effective_level(" Warning "), "warn");
        assert_eq!(effective_level("verbose"), "info");
        assert_eq!(effective_level(""), "info");
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            directory: Some(dir.path().display().to_string()),
        };
        init_structured_logging(&config);
        init_structured_logging(&config);
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
