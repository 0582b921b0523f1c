//! Script command - render migrations as SQL without executing them

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{get_config, get_context, get_logger, log_event};
use crate::output;
use bdms_core::migrations;
use bdms_core::services::ScriptService;
use bdms_core::{LogEvent, MigrationDefinition};

pub fn run(connection: Option<String>, pending: bool, output_path: Option<PathBuf>) -> Result<()> {
    log_event(&get_logger(), LogEvent::new("command_executed").with_command("script"));
    let script = if pending {
        // Pending is relative to the ledger, so this one needs the database
        get_context(connection, false)?.script(true)?
    } else {
        let (_, config) = get_config(connection)?;
        let catalog = migrations::catalog()?;
        let definitions: Vec<&MigrationDefinition> = catalog.definitions().iter().collect();
        ScriptService::new(&config.ledger).render(&definitions)?
    };

    match output_path {
        Some(path) => {
            std::fs::write(&path, &script).with_context(|| format!("Failed to write {}", path.display()))?;
            output::success(&format!("Script written to {}", path.display()));
        }
        None => print!("{}", script),
    }
    Ok(())
}
