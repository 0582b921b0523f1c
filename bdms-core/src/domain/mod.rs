//! Core domain entities
//!
//! Migration definitions, ledger records and the operation vocabulary.
//! These are pure data structures with validation logic - no I/O.

pub mod migration;
pub mod operation;
pub mod result;
mod value;
mod backup;

pub use migration::{MigrationBuilder, MigrationCatalog, MigrationDefinition, MigrationId, MigrationRecord};
pub use operation::{
    ColumnDef, ForeignKey, Operation, Predicate, ReferentialAction, SeedData, SeedFormat, SeedRows, TableDef,
    TableName,
};
pub use value::SqlValue;
pub use backup::{BackupManifest, BackupMetadata};
