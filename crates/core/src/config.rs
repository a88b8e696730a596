//! Configuration for courier with per-directory overrides.
//!
//! Config priority: directory-local (courier.toml) > user (~/.config/courier/config.toml) > defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// File name looked up next to the working directory.
pub const CONFIG_FILE_NAME: &str = "courier.toml";

// ============================================================================
// Queue Configuration
// ============================================================================

/// Message queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Sleep between two drain cycles of the message loop
  pub poll_interval_ms: u64,

  /// Deliver messages marked `send_as_task` through their routing context's
  /// scheduler instead of inline on the loop thread
  pub send_as_tasks: bool,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 25,
      send_as_tasks: false,
    }
  }
}

impl QueueConfig {
  pub fn poll_interval(&self) -> Duration {
    // A zero interval would spin the loop thread
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Task scheduler settings, shared by every routing context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Upper bound on how long an idle scheduler loop sleeps before
  /// re-checking its stop signal
  pub idle_wait_ms: u64,

  /// Start the application scheduler together with the message loop
  pub autostart_app: bool,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      idle_wait_ms: 100,
      autostart_app: true,
    }
  }
}

impl SchedulerConfig {
  pub fn idle_wait(&self) -> Duration {
    Duration::from_millis(self.idle_wait_ms.max(1))
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Rotation policy for the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
  Hourly,
  #[default]
  Daily,
  Never,
}

impl std::str::FromStr for LogRotation {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "hourly" => Ok(Self::Hourly),
      "daily" => Ok(Self::Daily),
      "never" => Ok(Self::Never),
      other => Err(format!("unknown log rotation: {other}")),
    }
  }
}

/// Logging settings (consumed by the binary, libraries only emit events)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: error, warn, info, debug, trace. `RUST_LOG` overrides it.
  pub level: String,

  /// Rotation policy when file logging is enabled
  pub rotation: LogRotation,

  /// Directory for `courier.log`; console only when unset
  #[serde(skip_serializing_if = "Option::is_none")]
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: LogRotation::Daily,
      directory: None,
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub queue: QueueConfig,
  pub scheduler: SchedulerConfig,
  pub logging: LoggingConfig,
}

impl Config {
  /// Load a config file, failing on IO or parse errors
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config for a directory, with fallback to user config and then defaults.
  ///
  /// Unreadable or malformed files are skipped.
  pub fn discover(dir: &Path) -> Self {
    let local = Self::local_config_path(dir);
    if local.exists()
      && let Ok(config) = Self::load(&local)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(config) = Self::load(&user_config_path)
    {
      return config;
    }

    Self::default()
  }

  /// Write this config as TOML, creating parent directories
  pub fn save(&self, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(self)?;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("COURIER_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("courier").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("courier").join("config.toml"))
  }

  /// Get the directory-local config path
  pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# courier configuration
# Place in ./courier.toml or ~/.config/courier/config.toml

# ============================================================================
# Message Queue
# ============================================================================

[queue]
# Milliseconds the message loop sleeps between drain cycles
poll_interval_ms = {poll}

# Deliver messages flagged send_as_task on their routing context's scheduler
send_as_tasks = {as_tasks}

# ============================================================================
# Task Schedulers
# ============================================================================

[scheduler]
# Max milliseconds an idle scheduler waits before re-checking for shutdown
idle_wait_ms = {idle}

# Start the application scheduler along with the message loop
autostart_app = {autostart}

# ============================================================================
# Logging
# ============================================================================

[logging]
# error, warn, info, debug, trace (RUST_LOG takes precedence)
level = "{level}"

# hourly, daily, never
rotation = "daily"

# Uncomment to also write courier.log into a directory:
# directory = "/var/log/courier"
"#,
      poll = defaults.queue.poll_interval_ms,
      as_tasks = defaults.queue.send_as_tasks,
      idle = defaults.scheduler.idle_wait_ms,
      autostart = defaults.scheduler.autostart_app,
      level = defaults.logging.level,
    )
  }
}
