//! Status and list commands - show the ledger against the compiled-in catalog

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::{get_context, get_logger, log_event};
use crate::output;
use bdms_core::migrations;
use bdms_core::services::MigrationState;
use bdms_core::LogEvent;

pub fn run(connection: Option<String>, json: bool) -> Result<()> {
    log_event(&get_logger(), LogEvent::new("command_executed").with_command("status"));
    let ctx = get_context(connection, false)?;
    let status = ctx.migrations().status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Migration Status".bold());
    println!("Database: {}", ctx.config.connection);
    println!("Ledger: {}", ctx.config.ledger.qualified());
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Migration", "State", "Applied at", "Notes"]);
    for entry in &status.entries {
        let state = match entry.state {
            MigrationState::Applied => "applied".green().to_string(),
            MigrationState::Pending => "pending".yellow().to_string(),
        };
        let mut notes = Vec::new();
        if entry.drifted {
            notes.push("changed since applied".red().to_string());
        }
        if entry.irreversible {
            notes.push("irreversible".dimmed().to_string());
        }
        table.add_row(vec![
            entry.id.clone(),
            state,
            entry
                .applied_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            notes.join(", "),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{} applied, {} pending", status.applied_count(), status.pending_count());

    if !status.unknown.is_empty() {
        println!();
        output::warning("Ledger entries with no compiled-in migration:");
        for id in &status.unknown {
            println!("  {}", id);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ListEntry {
    id: String,
    checksum: String,
    irreversible: bool,
    up: Vec<String>,
    down: Vec<String>,
}

/// Doesn't open the database
pub fn run_list(json: bool) -> Result<()> {
    let catalog = migrations::catalog()?;
    let entries: Vec<ListEntry> = catalog
        .definitions()
        .iter()
        .map(|def| ListEntry {
            id: def.id.to_string(),
            checksum: def.checksum(),
            irreversible: def.is_irreversible(),
            up: def.up.iter().map(|op| op.describe()).collect(),
            down: def.down.iter().map(|op| op.describe()).collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in entries {
        let suffix = if entry.irreversible { " (irreversible)".dimmed().to_string() } else { String::new() };
        println!("{}{}", entry.id.bold(), suffix);
        for op in &entry.up {
            println!("  {} {}", "up".green(), op);
        }
        for op in &entry.down {
            println!("  {} {}", "down".yellow(), op);
        }
        println!();
    }

    Ok(())
}
