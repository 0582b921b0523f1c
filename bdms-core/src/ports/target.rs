//! Migration target port - the database a migration run mutates

use crate::domain::result::Result;
use crate::domain::{MigrationRecord, Operation};

/// A database the runner can apply migrations to.
///
/// Implementations own the connection and its transaction scope. The runner
/// drives the protocol: `begin`, one `execute` per primitive, a ledger write,
/// then `commit` (or `rollback` on any failure).
///
/// `execute` must classify engine failures as [`SchemaConflict`] or
/// [`DataIntegrityViolation`] where it can tell them apart, and fall back to
/// [`Database`] otherwise.
///
/// [`SchemaConflict`]: crate::domain::result::Error::SchemaConflict
/// [`DataIntegrityViolation`]: crate::domain::result::Error::DataIntegrityViolation
/// [`Database`]: crate::domain::result::Error::Database
pub trait MigrationTarget {
    /// Create the ledger table (and its schema) if missing
    fn ensure_ledger(&self) -> Result<()>;

    /// Whether the ledger table exists; read-only callers check this
    /// instead of creating it
    fn ledger_exists(&self) -> Result<bool>;

    /// All ledger records, ascending by id
    fn applied(&self) -> Result<Vec<MigrationRecord>>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Execute one primitive inside the current transaction
    fn execute(&self, op: &Operation) -> Result<()>;

    /// Insert a ledger row inside the current transaction
    fn record(&self, record: &MigrationRecord) -> Result<()>;

    /// Delete a ledger row inside the current transaction
    fn forget(&self, id: &str) -> Result<()>;
}
