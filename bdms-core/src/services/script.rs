//! Script service - render migrations as a reviewable SQL script
//!
//! The script mirrors what the runner executes: one transaction per
//! migration, the ledger insert inside it. Parameters are inlined as
//! literals so the output can be handed to a DBA as-is.

use std::fmt::Write as _;

use chrono::{NaiveDateTime, Utc};

use crate::adapters::duckdb::LedgerTable;
use crate::adapters::sql::{self, Statement};
use crate::domain::result::Result;
use crate::domain::{MigrationDefinition, SqlValue};

pub struct ScriptService<'a> {
    ledger: &'a LedgerTable,
    product_version: String,
    generated_at: NaiveDateTime,
}

impl<'a> ScriptService<'a> {
    pub fn new(ledger: &'a LedgerTable) -> Self {
        Self {
            ledger,
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now().naive_utc(),
        }
    }

    /// Timestamp written as `applied_at` of every ledger insert (UTC)
    pub fn with_generated_at(mut self, generated_at: NaiveDateTime) -> Self {
        self.generated_at = generated_at;
        self
    }

    pub fn with_product_version(mut self, version: impl Into<String>) -> Self {
        self.product_version = version.into();
        self
    }

    /// Render the given definitions in order
    pub fn render(&self, definitions: &[&MigrationDefinition]) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "-- bdms-migrate {} migration script", self.product_version);
        let _ = writeln!(
            out,
            "-- {} migration(s), generated {} UTC",
            definitions.len(),
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        out.push('\n');

        let _ = writeln!(out, "CREATE SCHEMA IF NOT EXISTS {};", sql::quote_ident(&self.ledger.schema));
        let _ = writeln!(
            out,
            "CREATE TABLE IF NOT EXISTS {} (migration_id VARCHAR PRIMARY KEY, applied_at TIMESTAMP NOT NULL, product_version VARCHAR, checksum VARCHAR);",
            self.ledger.qualified()
        );

        for def in definitions {
            out.push('\n');
            let _ = writeln!(out, "-- {}", def.id);
            out.push_str("BEGIN TRANSACTION;\n");
            for op in &def.up {
                for statement in sql::render(op)? {
                    push_statement(&mut out, &statement);
                }
            }
            push_statement(&mut out, &self.ledger_insert(def));
            out.push_str("COMMIT;\n");
        }

        Ok(out)
    }

    fn ledger_insert(&self, def: &MigrationDefinition) -> Statement {
        Statement {
            sql: format!(
                "INSERT INTO {} (migration_id, applied_at, product_version, checksum) VALUES (?, CAST(? AS TIMESTAMP), ?, ?)",
                self.ledger.qualified()
            ),
            params: vec![
                SqlValue::from(def.id.as_str()),
                SqlValue::from(self.generated_at.format(sql::TIMESTAMP_FORMAT).to_string()),
                SqlValue::from(self.product_version.as_str()),
                SqlValue::from(def.checksum()),
            ],
        }
    }
}

fn push_statement(out: &mut String, statement: &Statement) {
    let inline = statement.to_inline_sql();
    out.push_str(inline.trim_end().trim_end_matches(';'));
    out.push_str(";\n");
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{ColumnDef, Operation};

    #[test]
    fn test_script_wraps_each_migration() {
        let ledger = LedgerTable::default();
        let first = MigrationDefinition::builder("20230307140010_AddCasingTable")
            .up(Operation::add_column("bdms.borehole", ColumnDef::new("casing_count", "INTEGER")))
            .build()
            .unwrap();
        let second = MigrationDefinition::builder("20230612083000_AddWorkflowStatus")
            .up(Operation::sql("UPDATE bdms.borehole SET workflow_status = 'draft';"))
            .build()
            .unwrap();

        let generated_at = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let script = ScriptService::new(&ledger)
            .with_product_version("9.9.9")
            .with_generated_at(generated_at)
            .render(&[&first, &second])
            .unwrap();

        assert!(script.starts_with("-- bdms-migrate 9.9.9 migration script"));
        assert_eq!(script.matches("BEGIN TRANSACTION;").count(), 2);
        assert_eq!(script.matches("COMMIT;").count(), 2);
        assert!(script.contains("-- 20230307140010_AddCasingTable\nBEGIN TRANSACTION;"));
        assert!(script.contains("UPDATE bdms.borehole SET workflow_status = 'draft';\n"));
        assert!(!script.contains(";;"));
        assert!(!script.contains("CURRENT_TIMESTAMP"));
        assert!(script.contains(&format!(
            "VALUES ('20230612083000_AddWorkflowStatus', CAST('2025-03-01 12:30:00.000000' AS TIMESTAMP), '9.9.9', '{}');",
            second.checksum()
        )));
    }

    #[test]
    fn test_empty_script_still_creates_ledger() {
        let ledger = LedgerTable::new("ops", "history");
        let script = ScriptService::new(&ledger).render(&[]).unwrap();
        assert!(script.contains("CREATE TABLE IF NOT EXISTS \"ops\".\"history\""));
        assert!(!script.contains("BEGIN TRANSACTION"));
    }
}
