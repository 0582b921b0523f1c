//! Lint service - design-time checks over the compiled-in catalog
//!
//! Nothing here touches a database. Every operation is rendered the way the
//! runner would render it, raw SQL is parsed with the DuckDB dialect, and
//! seed files are decoded.

use serde::Serialize;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::adapters::sql;
use crate::domain::{MigrationCatalog, MigrationDefinition, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub migration: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct LintReport {
    pub checked: usize,
    pub findings: Vec<Finding>,
}

impl LintReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.count(Severity::Warning) > 0
    }

    /// Errors always fail; warnings fail only when denied
    pub fn passes(&self, deny_warnings: bool) -> bool {
        !self.has_errors() && !(deny_warnings && self.has_warnings())
    }
}

/// Validate raw SQL syntax with the DuckDB dialect
pub fn validate_sql_syntax(statement: &str) -> std::result::Result<(), String> {
    let dialect = DuckDbDialect {};
    let parsed = Parser::parse_sql(&dialect, statement).map_err(|e| {
        let msg = e.to_string();
        msg.trim_start_matches("sql parser error: ").to_string()
    })?;
    if parsed.is_empty() {
        return Err("no statement".to_string());
    }
    Ok(())
}

pub struct LintService<'a> {
    catalog: &'a MigrationCatalog,
}

impl<'a> LintService<'a> {
    pub fn new(catalog: &'a MigrationCatalog) -> Self {
        Self { catalog }
    }

    pub fn run(&self) -> LintReport {
        let mut report = LintReport::default();
        for def in self.catalog.definitions() {
            report.checked += 1;
            self.check_definition(def, &mut report.findings);
        }
        report.findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.migration.cmp(&b.migration)));
        report
    }

    fn check_definition(&self, def: &MigrationDefinition, findings: &mut Vec<Finding>) {
        let mut push = |severity, message: String| {
            findings.push(Finding {
                migration: def.id.to_string(),
                severity,
                message,
            })
        };

        if def.up.is_empty() {
            push(Severity::Warning, "up has no operations".to_string());
        }

        if def.is_irreversible() {
            push(
                Severity::Warning,
                "up destroys data and down is empty; revert will be refused".to_string(),
            );
        } else if def.down.is_empty() {
            push(
                Severity::Note,
                "down is empty; revert only removes the ledger entry".to_string(),
            );
        }

        for (direction, ops) in [("up", &def.up), ("down", &def.down)] {
            for (index, op) in ops.iter().enumerate() {
                let at = format!("{} #{} ({})", direction, index + 1, op.describe());

                if let Err(e) = sql::render(op) {
                    push(Severity::Error, format!("{}: {}", at, e));
                    continue;
                }

                if let Operation::Sql { statement, .. } = op {
                    if let Err(e) = validate_sql_syntax(statement) {
                        push(Severity::Error, format!("{}: {}", at, e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnDef, Predicate, SeedData};

    fn catalog(defs: Vec<MigrationDefinition>) -> MigrationCatalog {
        MigrationCatalog::new(defs).unwrap()
    }

    #[test]
    fn test_clean_migration_has_no_findings() {
        let def = MigrationDefinition::builder("20230612083000_AddWorkflowStatus")
            .up(Operation::add_column("bdms.borehole", ColumnDef::new("workflow_status", "VARCHAR")))
            .up(Operation::sql("UPDATE bdms.borehole SET workflow_status = 'draft'"))
            .down(Operation::drop_column("bdms.borehole", "workflow_status"))
            .build()
            .unwrap();
        let catalog = catalog(vec![def]);
        let report = LintService::new(&catalog).run();

        assert_eq!(report.checked, 1);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert!(report.passes(true));
    }

    #[test]
    fn test_irreversible_is_a_warning() {
        let def = MigrationDefinition::builder("20230425130522_RemapLithologyCodes")
            .up(Operation::delete("bdms.codelist", Predicate::eq("id", 15101045)))
            .build()
            .unwrap();
        let catalog = catalog(vec![def]);
        let report = LintService::new(&catalog).run();

        assert_eq!(report.count(Severity::Warning), 1);
        assert!(report.passes(false));
        assert!(!report.passes(true));
    }

    #[test]
    fn test_empty_down_on_additive_migration_is_a_note() {
        let def = MigrationDefinition::builder("20230220095411_AddHydrogeologyCodelists")
            .up(Operation::add_column("bdms.codelist", ColumnDef::new("order", "INTEGER")))
            .build()
            .unwrap();
        let catalog = catalog(vec![def]);
        let report = LintService::new(&catalog).run();

        assert_eq!(report.count(Severity::Note), 1);
        assert!(report.passes(true));
    }

    #[test]
    fn test_bad_sql_and_bad_seed_are_errors() {
        let def = MigrationDefinition::builder("20230307140010_AddCasingTable")
            .up(Operation::sql("CREAT TABLE casing (id INTEGER)"))
            .up(Operation::seed(
                "bdms.codelist",
                SeedData::csv("broken.csv", "id,code\n1,a,extra\n"),
            ))
            .down(Operation::drop_table("bdms.casing"))
            .build()
            .unwrap();
        let catalog = catalog(vec![def]);
        let report = LintService::new(&catalog).run();

        assert_eq!(report.count(Severity::Error), 2);
        assert!(!report.passes(false));
        assert!(report.findings[0].message.starts_with("up #1"));
    }

    #[test]
    fn test_validate_sql_syntax() {
        assert!(validate_sql_syntax("SELECT 1").is_ok());
        assert!(validate_sql_syntax("UPDATE bdms.codelist SET code = ? WHERE id = ?").is_ok());
        assert!(validate_sql_syntax("SELEC 1").is_err());
        assert!(validate_sql_syntax("").is_err());
    }
}
