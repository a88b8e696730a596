pub mod config;
pub mod error;

pub use config::{CONFIG_FILE_NAME, Config, LogRotation, LoggingConfig, QueueConfig, SchedulerConfig};
pub use error::{ConfigError, Result};
