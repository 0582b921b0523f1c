//! CLI command implementations

pub mod backup;
pub mod lint;
pub mod logs;
pub mod revert;
pub mod script;
pub mod status;
pub mod update;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bdms_core::config::Config;
use bdms_core::{LogEvent, LoggingService, MigrationContext};

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    match LoggingService::new(&data_dir, env!("CARGO_PKG_VERSION")) {
        Ok(logger) => Some(logger),
        Err(e) => {
            tracing::debug!(error = %format!("{:#}", e), "event log unavailable");
            None
        }
    }
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("BDMS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".bdms"))
        .context("Could not find home directory (set BDMS_DIR)")
}

/// Load settings from the data directory with the `--connection` flag applied
pub fn get_config(connection: Option<String>) -> Result<(PathBuf, Config)> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    let config = Config::load(&data_dir)
        .context("Failed to load settings")?
        .with_connection(connection)
        .context("Invalid --connection")?;
    Ok((data_dir, config))
}

/// Open the target database; `locked` takes the run lock first
pub fn get_context(connection: Option<String>, locked: bool) -> Result<MigrationContext> {
    let (data_dir, config) = get_config(connection)?;
    let ctx = if locked {
        MigrationContext::open_locked(config, &data_dir)
    } else {
        MigrationContext::open(config, &data_dir)
    };
    ctx.context("Failed to open the target database")
}
