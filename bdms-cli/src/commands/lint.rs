//! Lint command - check migration definitions without a database

use anyhow::{bail, Result};
use colored::Colorize;

use crate::output;
use bdms_core::migrations;
use bdms_core::services::{LintService, Severity};

pub fn run(deny_warnings: bool, json: bool) -> Result<()> {
    let catalog = migrations::catalog()?;
    let report = LintService::new(&catalog).run();
    let passed = report.passes(deny_warnings);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "checked": report.checked,
                "passed": passed,
                "findings": report.findings,
            }))?
        );
    } else {
        if report.findings.is_empty() {
            output::success(&format!("{} migration(s) checked, no findings", report.checked));
        } else {
            let mut table = output::create_table();
            table.set_header(vec!["Severity", "Migration", "Finding"]);
            for finding in &report.findings {
                let severity = match finding.severity {
                    Severity::Error => "error".red().bold().to_string(),
                    Severity::Warning => "warning".yellow().to_string(),
                    Severity::Note => "note".dimmed().to_string(),
                };
                table.add_row(vec![severity, finding.migration.clone(), finding.message.clone()]);
            }
            println!("{}", table);
            println!(
                "{} migration(s) checked: {} error(s), {} warning(s), {} note(s)",
                report.checked,
                report.count(Severity::Error),
                report.count(Severity::Warning),
                report.count(Severity::Note)
            );
        }
    }

    if !passed {
        bail!("Lint failed");
    }
    Ok(())
}
