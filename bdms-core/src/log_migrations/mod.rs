//! Event log schema
//!
//! `logs.duckdb` is migrated by the same runner as the target database,
//! with its ledger in `sys.migrations`.

use crate::adapters::duckdb::LedgerTable;
use crate::domain::result::Result;
use crate::domain::{ColumnDef, MigrationCatalog, MigrationDefinition, Operation, TableDef};

/// Table holding log events
pub const LOG_TABLE: &str = "sys.logs";

pub fn ledger() -> LedgerTable {
    LedgerTable::new("sys", "migrations")
}

pub fn catalog() -> Result<MigrationCatalog> {
    MigrationCatalog::new(vec![
        MigrationDefinition::builder("20250101000000_CreateLogs")
            .up(TableDef::new(LOG_TABLE)
                .column(ColumnDef::new("id", "BIGINT").not_null())
                .column(ColumnDef::new("timestamp", "BIGINT").not_null())
                .column(ColumnDef::new("app_version", "VARCHAR").not_null())
                .column(ColumnDef::new("platform", "VARCHAR").not_null())
                .column(ColumnDef::new("event", "VARCHAR").not_null())
                .column(ColumnDef::new("command", "VARCHAR"))
                .column(ColumnDef::new("migration_id", "VARCHAR"))
                .column(ColumnDef::new("error_message", "VARCHAR"))
                .column(ColumnDef::new("error_details", "VARCHAR"))
                .build())
            .down(Operation::drop_table(LOG_TABLE))
            .build()?,
        MigrationDefinition::builder("20250301000000_AddLogDuration")
            .up(Operation::add_column(LOG_TABLE, ColumnDef::new("duration_ms", "BIGINT")))
            .down(Operation::drop_column(LOG_TABLE, "duration_ms"))
            .build()?,
    ])
}
