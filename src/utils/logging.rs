//! Subscriber setup for binaries and tests that embed the server.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the owning process's decision.

use crate::config::LoggingConfig;
use crate::error::{RemoteError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber according to `config`.
///
/// `RUST_LOG` overrides `config.log_level` when set. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match (config.log_to_file, config.json_format) {
        (true, json) => {
            let path = config.log_file_path.as_deref().ok_or_else(|| {
                RemoteError::ConfigError("log_file_path is required for file logging".into())
            })?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| RemoteError::ConfigError(format!("Failed to open log file: {e}")))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        (false, true) => builder.json().try_init(),
        (false, false) => builder.try_init(),
    };

    installed.map_err(|e| RemoteError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
