//! Backup command - manage database backups

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::{get_config, get_context, get_logger, log_event};
use crate::output;
use bdms_core::config::Config;
use bdms_core::services::{BackupService, RunLock};
use bdms_core::LogEvent;

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create {
        /// Maximum number of backups to keep (overrides settings)
        #[arg(long, short = 'm')]
        max_backups: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List available backups
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore the database file from a backup
    Restore {
        /// Backup name to restore
        name: String,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// A BackupService without opening the database.
/// Used for list and restore.
fn get_backup_service(connection: Option<String>) -> Result<(BackupService, Config)> {
    let (data_dir, config) = get_config(connection)?;
    let Some(db_path) = config.db_path() else {
        bail!("In-memory databases have no backups");
    };
    Ok((BackupService::new(data_dir.join("backups"), db_path), config))
}

pub fn run(connection: Option<String>, command: BackupCommands) -> Result<()> {
    log_event(&get_logger(), LogEvent::new("command_executed").with_command("backup"));
    match command {
        BackupCommands::Create { max_backups, json } => {
            let mut ctx = get_context(connection, true)?;
            if let Some(max) = max_backups {
                ctx.config.max_backups = max;
            }
            let Some(result) = ctx.backup()? else {
                bail!("In-memory databases have no backups");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", "Backup created".green());
                println!("  Name: {}", result.name);
                println!("  Size: {}", result.size_display());
                if let Some(id) = &result.latest_migration {
                    println!("  Latest migration: {}", id);
                }
            }
        }
        BackupCommands::List { json } => {
            let (backup_service, _) = get_backup_service(connection)?;
            let backups = backup_service.list()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&backups)?);
                return Ok(());
            }

            if backups.is_empty() {
                println!("No backups found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Name", "Created", "Size", "Latest migration"]);
            for backup in backups {
                table.add_row(vec![
                    backup.name.clone(),
                    backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    backup.size_display(),
                    backup.latest_migration.unwrap_or_default(),
                ]);
            }
            println!("{}", table);
        }
        BackupCommands::Restore { name, force, json } => {
            // Restore replaces the file, so the database stays closed; the
            // run lock keeps migration runs out meanwhile
            let (backup_service, config) = get_backup_service(connection)?;
            let Some(db_path) = config.db_path() else {
                bail!("In-memory databases have no backups");
            };
            if !force && !json {
                if !Confirm::new()
                    .with_prompt(format!("Replace {} with backup '{}'?", db_path.display(), name))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let _lock = RunLock::acquire(&db_path, config.lock_timeout)?;
            let restored = backup_service.restore(&name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&restored)?);
            } else {
                output::success(&format!("Database restored from backup: {}", name));
                if let Some(id) = &restored.latest_migration {
                    println!("  Latest migration: {}", id);
                }
            }
        }
    }

    Ok(())
}
