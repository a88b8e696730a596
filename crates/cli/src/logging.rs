//! Logging setup for the courier binary

use courier_core::{LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "courier.log";

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging from the `[logging]` config section.
///
/// Logs go to the console, or to a rolling `courier.log` when a directory is
/// configured. `RUST_LOG` overrides the configured level.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
  let level = parse_log_level(&config.level);

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();

  let Some(log_dir) = config.directory.as_deref() else {
    init_console(env_filter);
    return None;
  };

  if let Err(e) = std::fs::create_dir_all(log_dir) {
    // Fall back to console-only logging
    init_console(env_filter);
    tracing::warn!("Cannot create log directory {:?}: {}", log_dir, e);
    return None;
  }

  let file_appender = match config.rotation {
    LogRotation::Hourly => tracing_appender::rolling::hourly(log_dir, LOG_FILE_NAME),
    LogRotation::Daily => tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME),
    LogRotation::Never => tracing_appender::rolling::never(log_dir, LOG_FILE_NAME),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_thread_names(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

fn init_console(env_filter: EnvFilter) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_thread_names(true)
    .with_writer(std::io::stderr)
    .init();
}
