//! Revert command - undo applied migrations, most recent first

use std::cell::RefCell;

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use serde::Serialize;

use super::update::FailureOutput;
use super::{get_context, get_logger, log_event};
use crate::output::{self, Progress};
use bdms_core::services::MigrationEvent;
use bdms_core::{Error, LogEvent, MigrationId};

pub enum RevertTarget {
    Steps(usize),
    To(String),
}

#[derive(Serialize)]
struct RevertOutput<'a> {
    reverted: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<usize>,
    backup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<FailureOutput>,
}

pub fn run(connection: Option<String>, target: RevertTarget, skip_backup: bool, force: bool, json: bool) -> Result<()> {
    let logger = get_logger();
    log_event(&logger, LogEvent::new("command_executed").with_command("revert"));

    let ctx = get_context(connection, true)?;

    let progress = Progress::new(json);
    let reverted = RefCell::new(Vec::new());
    let observer = |event: &MigrationEvent<'_>| match event {
        MigrationEvent::Reverting(id) => progress.set_message(format!("Reverting {}", id)),
        MigrationEvent::Reverted { id, elapsed } => {
            if let Some(l) = &logger {
                let _ = l.log_migration_reverted(id.as_str(), *elapsed);
            }
            if !json {
                progress.println(format!("  {} {} ({})", "↶".yellow(), id, output::format_elapsed(*elapsed)));
            }
            reverted.borrow_mut().push(id.to_string());
        }
        MigrationEvent::Failed { id, error } => {
            if let Some(l) = &logger {
                let details = format!("{:?}", error.root());
                let _ = l.log_migration_failed(id.as_str(), &error.root().to_string(), Some(&details));
            }
        }
        _ => {}
    };

    let service = ctx
        .migrations()
        .with_product_version(env!("CARGO_PKG_VERSION"))
        .with_observer(&observer);

    let planned = match &target {
        RevertTarget::Steps(steps) => service.plan_revert(*steps),
        RevertTarget::To(id) => MigrationId::parse(id).and_then(|id| service.plan_revert_to(&id)),
    };
    let plan = match planned {
        Ok(plan) => plan,
        Err(e) => {
            if let Error::IrreversibleMigration(id) = &e {
                if let Some(l) = &logger {
                    let _ = l.log_revert_rejected(id, &e.to_string());
                }
            }
            return Err(e.into());
        }
    };

    if plan.is_empty() {
        progress.finish();
        if json {
            let out = RevertOutput { reverted: &[], remaining: None, backup_name: None, failed: None };
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            output::info("Nothing to revert.");
        }
        return Ok(());
    }

    if !force && !json {
        progress.finish();
        println!("{}", "Migrations to revert (most recent first):".bold());
        for id in plan.ids() {
            println!("  {}", id);
        }
        if !Confirm::new()
            .with_prompt(format!("Revert {} migration(s)?", plan.definitions.len()))
            .default(false)
            .interact()?
        {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let backup_name = if skip_backup {
        None
    } else {
        progress.set_message("Creating safety backup".to_string());
        ctx.backup()?.map(|b| b.name)
    };
    if let (Some(name), false) = (&backup_name, json) {
        progress.println(format!("Safety backup: {}", name));
    }

    let result = service.execute_revert(plan);
    progress.finish();

    match result {
        Ok(result) => {
            if json {
                let out = RevertOutput {
                    reverted: &result.reverted,
                    remaining: Some(result.remaining),
                    backup_name,
                    failed: None,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                output::success(&format!(
                    "Reverted {} migration(s), {} still applied",
                    result.reverted_count(),
                    result.remaining
                ));
            }
            Ok(())
        }
        Err(e) => {
            let reverted = reverted.into_inner();
            if json {
                let out = RevertOutput {
                    reverted: &reverted,
                    remaining: None,
                    backup_name,
                    failed: Some(FailureOutput {
                        migration_id: e.migration_id().map(str::to_string),
                        error: e.root().to_string(),
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if let Some(name) = &backup_name {
                output::warning(&format!("Restore with: bdms-migrate backup restore {}", name));
            }
            Err(e.into())
        }
    }
}
