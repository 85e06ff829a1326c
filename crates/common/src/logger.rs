use crate::error::ReplicaError;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log file name inside the log directory
pub const LOG_FILE_NAME: &str = "replica.log";

/// Where log output goes
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Console only (development, tests, one-shot CLI runs)
    Console,
    /// Console plus an append-only file in the given directory
    ConsoleAndFile(PathBuf),
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `log_level` when set.
pub fn init_logging(target: &LogTarget, log_level: &str) -> Result<(), ReplicaError> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(build_filter(log_level));

    match target {
        LogTarget::Console => {
            tracing_subscriber::registry()
                .with(console_layer)
                .try_init()
                .map_err(|e| ReplicaError::config(format!("Failed to install logger: {}", e)))?;

            tracing::info!("Console logging initialized: level={}", log_level);
        }
        LogTarget::ConsoleAndFile(log_dir) => {
            let log_file_path = log_dir.join(LOG_FILE_NAME);
            let log_file = open_log_file(log_dir, &log_file_path)?;

            let file_layer = fmt::layer()
                .with_writer(log_file)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(build_filter(log_level));

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| ReplicaError::config(format!("Failed to install logger: {}", e)))?;

            tracing::info!(
                "Logging initialized: level={}, log_file={}",
                log_level,
                log_file_path.display()
            );
        }
    }

    Ok(())
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(parse_log_level(log_level)).into())
    })
}

fn open_log_file(log_dir: &Path, log_file_path: &Path) -> Result<std::fs::File, ReplicaError> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        ReplicaError::config(format!(
            "Failed to create log directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| {
            ReplicaError::config(format!(
                "Failed to open log file {}: {}",
                log_file_path.display(),
                e
            ))
        })
}

/// Parse string to tracing Level
pub fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace"), Level::TRACE);
        assert_eq!(parse_log_level("debug"), Level::DEBUG);
        assert_eq!(parse_log_level("WARNING"), Level::WARN);
        assert_eq!(parse_log_level("Error"), Level::ERROR);
        assert_eq!(parse_log_level("verbose"), Level::INFO);
    }
}
