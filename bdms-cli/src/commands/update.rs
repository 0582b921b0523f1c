//! Update command - apply pending migrations

use std::cell::RefCell;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::{get_context, get_logger, log_event};
use crate::output::{self, Progress};
use bdms_core::services::MigrationEvent;
use bdms_core::{LogEvent, MigrationId};

#[derive(Serialize)]
struct UpdateOutput<'a> {
    applied: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    already_applied: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<FailureOutput>,
}

#[derive(Serialize)]
pub(crate) struct FailureOutput {
    pub migration_id: Option<String>,
    pub error: String,
}

pub fn run(connection: Option<String>, to: Option<String>, json: bool) -> Result<()> {
    let logger = get_logger();
    log_event(&logger, LogEvent::new("command_executed").with_command("update"));

    let until = to.as_deref().map(MigrationId::parse).transpose()?;
    let ctx = get_context(connection, true)?;

    let progress = Progress::new(json);
    let applied = RefCell::new(Vec::new());
    let observer = |event: &MigrationEvent<'_>| match event {
        MigrationEvent::Applying(id) => progress.set_message(format!("Applying {}", id)),
        MigrationEvent::Applied { id, elapsed } => {
            if let Some(l) = &logger {
                let _ = l.log_migration_applied(id.as_str(), *elapsed);
            }
            if !json {
                progress.println(format!("  {} {} ({})", "✓".green(), id, output::format_elapsed(*elapsed)));
            }
            applied.borrow_mut().push(id.to_string());
        }
        MigrationEvent::Failed { id, error } => {
            if let Some(l) = &logger {
                let details = format!("{:?}", error.root());
                let _ = l.log_migration_failed(id.as_str(), &error.root().to_string(), Some(&details));
            }
        }
        _ => {}
    };

    let result = ctx
        .migrations()
        .with_product_version(env!("CARGO_PKG_VERSION"))
        .with_observer(&observer)
        .run_pending_until(until.as_ref());
    progress.finish();

    match result {
        Ok(result) => {
            if json {
                let out = UpdateOutput {
                    applied: &result.applied,
                    already_applied: Some(result.already_applied),
                    failed: None,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if result.applied.is_empty() {
                output::info("Database is up to date.");
            } else {
                output::success(&format!("Applied {} migration(s)", result.applied_count()));
            }
            Ok(())
        }
        Err(e) => {
            let applied = applied.into_inner();
            if json {
                let out = UpdateOutput {
                    applied: &applied,
                    already_applied: None,
                    failed: Some(FailureOutput {
                        migration_id: e.migration_id().map(str::to_string),
                        error: e.root().to_string(),
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if !applied.is_empty() {
                output::warning(&format!("Applied {} migration(s) before the failure", applied.len()));
            }
            Err(e.into())
        }
    }
}
