//! DuckDB migration target

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use duckdb::types::{ToSql, ToSqlOutput, Value, ValueRef};
use duckdb::{params, params_from_iter, Connection};
use tracing::{debug, warn};

use super::sql::{self, Statement};
use crate::domain::result::{Error, Result};
use crate::domain::{MigrationRecord, Operation, Predicate, SqlValue, TableName};
use crate::ports::MigrationTarget;

/// Connection string selecting an in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Map an engine failure on `statement` into the migration error taxonomy
fn classify(statement: &str, err: duckdb::Error) -> Error {
    let message = err.to_string();
    let lower = message.to_lowercase();

    if lower.contains("constraint error")
        || lower.contains("conversion error")
        || lower.contains("violates")
        || lower.contains("duplicate key")
    {
        Error::DataIntegrityViolation {
            statement: statement.to_string(),
            message,
        }
    } else if lower.contains("catalog error")
        || lower.contains("dependency error")
        || lower.contains("binder error")
        || lower.contains("already exists")
        || lower.contains("does not exist")
    {
        Error::SchemaConflict {
            statement: statement.to_string(),
            message,
        }
    } else {
        Error::database(format!("{} (statement: {})", message, statement))
    }
}

fn db_err(err: duckdb::Error) -> Error {
    Error::database(err.to_string())
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Boolean(*b)),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::BigInt(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Double(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Where the ledger lives in the target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    pub schema: String,
    pub table: String,
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            schema: "bdms".to_string(),
            table: "__migrations_history".to_string(),
        }
    }
}

impl LedgerTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn name(&self) -> TableName {
        TableName::new(self.schema.clone(), self.table.clone())
    }

    pub fn qualified(&self) -> String {
        sql::qualified(&self.name())
    }
}

/// DuckDB database a migration run is applied to
pub struct DuckDbTarget {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    ledger: LedgerTable,
}

impl DuckDbTarget {
    /// Open a target from a connection string: a database file path, or
    /// `:memory:` for an in-memory database.
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process holds the database file open.
    pub fn open(connection: &str, ledger: LedgerTable) -> Result<Self> {
        if connection == IN_MEMORY {
            return Self::open_in_memory(ledger);
        }

        let db_path = Path::new(connection);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                        ledger,
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        // Exponential backoff: 50ms, 100ms, 200ms, 400ms
                        let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            delay_ms = delay.as_millis() as u64,
                            "database busy, retrying: {}",
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(db_err(e));
                }
            }
        }

        Err(last_error
            .map(db_err)
            .unwrap_or_else(|| Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))))
    }

    pub fn open_in_memory(ledger: LedgerTable) -> Result<Self> {
        let config = duckdb::Config::default()
            .enable_autoload_extension(false)
            .map_err(db_err)?;
        let conn = Connection::open_in_memory_with_flags(config).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
            ledger,
        })
    }

    fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
        // Extension autoloading is disabled: cached extensions in
        // ~/.duckdb/extensions may not match the bundled engine
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    /// Database file, `None` for in-memory targets
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn ledger(&self) -> &LedgerTable {
        &self.ledger
    }

    fn run(&self, conn: &Connection, statement: &Statement) -> Result<()> {
        debug!(sql = %statement.sql, params = statement.params.len(), "executing");
        let result = if statement.params.is_empty() {
            // execute_batch accepts multi-statement raw SQL
            conn.execute_batch(&statement.sql)
        } else {
            conn.execute(&statement.sql, params_from_iter(statement.params.iter()))
                .map(|_| ())
        };
        result.map_err(|e| classify(&statement.sql, e))
    }

    /// Execute raw SQL outside the migration protocol
    pub fn execute_sql(&self, statement: &str) -> Result<()> {
        let conn = self.conn()?;
        self.run(&conn, &Statement { sql: statement.to_string(), params: Vec::new() })
    }

    pub fn table_exists(&self, table: &TableName) -> Result<bool> {
        let conn = self.conn()?;
        let schema = table.schema.as_deref().unwrap_or("main");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
                params![schema, &table.name],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    pub fn column_exists(&self, table: &TableName, column: &str) -> Result<bool> {
        let conn = self.conn()?;
        let schema = table.schema.as_deref().unwrap_or("main");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.columns
                 WHERE table_schema = ? AND table_name = ? AND column_name = ?",
                params![schema, &table.name, column],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Count rows in `table`, optionally restricted by `filter`
    pub fn count_rows(&self, table: &TableName, filter: Option<&Predicate>) -> Result<i64> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", sql::qualified(table));
        let mut params = Vec::new();
        if let Some(predicate) = filter {
            let rendered = sql::filter(predicate);
            sql.push_str(" WHERE ");
            sql.push_str(&rendered.sql);
            params = rendered.params;
        }
        conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(|e| classify(&sql, e))
    }

    /// Flush the WAL into the database file (before copying it)
    pub fn checkpoint(&self) -> Result<()> {
        if self.db_path.is_none() {
            return Ok(());
        }
        let conn = self.conn()?;
        conn.execute_batch("CHECKPOINT").map_err(db_err)
    }

    fn parse_applied_at(raw: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .map_err(|e| Error::database(format!("invalid applied_at '{}': {}", raw, e)))
    }
}

impl MigrationTarget for DuckDbTarget {
    fn ensure_ledger(&self) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {table} (
                 migration_id VARCHAR PRIMARY KEY,
                 applied_at TIMESTAMP NOT NULL,
                 product_version VARCHAR,
                 checksum VARCHAR
             );",
            schema = sql::quote_ident(&self.ledger.schema),
            table = self.ledger.qualified()
        );
        conn.execute_batch(&sql).map_err(|e| classify(&sql, e))
    }

    fn ledger_exists(&self) -> Result<bool> {
        self.table_exists(&self.ledger.name())
    }

    fn applied(&self) -> Result<Vec<MigrationRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT migration_id, CAST(applied_at AS VARCHAR), product_version, checksum
             FROM {} ORDER BY migration_id",
            self.ledger.qualified()
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| classify(&sql, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, applied_at, product_version, checksum) = row.map_err(db_err)?;
            records.push(MigrationRecord {
                id,
                applied_at: Self::parse_applied_at(&applied_at)?,
                product_version,
                checksum,
            });
        }
        Ok(records)
    }

    fn begin(&self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN TRANSACTION").map_err(db_err)
    }

    fn commit(&self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT").map_err(db_err)
    }

    fn rollback(&self) -> Result<()> {
        self.conn()?.execute_batch("ROLLBACK").map_err(db_err)
    }

    fn execute(&self, op: &Operation) -> Result<()> {
        let statements = sql::render(op)?;
        let conn = self.conn()?;
        for statement in &statements {
            self.run(&conn, statement)?;
        }
        Ok(())
    }

    fn record(&self, record: &MigrationRecord) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} (migration_id, applied_at, product_version, checksum)
             VALUES (?, CAST(? AS TIMESTAMP), ?, ?)",
            self.ledger.qualified()
        );
        conn.execute(
            &sql,
            params![
                &record.id,
                record.applied_at.format(sql::TIMESTAMP_FORMAT).to_string(),
                &record.product_version,
                &record.checksum,
            ],
        )
        .map_err(|e| classify(&sql, e))?;
        Ok(())
    }

    fn forget(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!("DELETE FROM {} WHERE migration_id = ?", self.ledger.qualified());
        conn.execute(&sql, [id]).map_err(|e| classify(&sql, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnDef, TableDef};
    use chrono::Utc;

    fn target() -> DuckDbTarget {
        DuckDbTarget::open(IN_MEMORY, LedgerTable::default()).unwrap()
    }

    fn record(id: &str) -> MigrationRecord {
        MigrationRecord {
            id: id.to_string(),
            applied_at: Utc::now().naive_utc(),
            product_version: Some("0.1.0".to_string()),
            checksum: None,
        }
    }

    #[test]
    fn test_ensure_ledger_is_idempotent() {
        let target = target();
        target.ensure_ledger().unwrap();
        target.ensure_ledger().unwrap();
        assert!(target
            .table_exists(&TableName::new("bdms", "__migrations_history"))
            .unwrap());
        assert!(target.applied().unwrap().is_empty());
    }

    #[test]
    fn test_record_and_forget() {
        let target = target();
        target.ensure_ledger().unwrap();
        target.record(&record("20230130112413_UnitiseChangeTracking")).unwrap();
        target.record(&record("20220921092000_MigrateTo_1_0_5")).unwrap();

        let applied = target.applied().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].id, "20220921092000_MigrateTo_1_0_5");
        assert_eq!(applied[0].product_version.as_deref(), Some("0.1.0"));

        target.forget("20220921092000_MigrateTo_1_0_5").unwrap();
        let applied = target.applied().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, "20230130112413_UnitiseChangeTracking");
    }

    #[test]
    fn test_custom_ledger_location() {
        let target = DuckDbTarget::open(IN_MEMORY, LedgerTable::new("sys", "migrations")).unwrap();
        target.ensure_ledger().unwrap();
        assert!(target.table_exists(&TableName::new("sys", "migrations")).unwrap());
        assert!(!target
            .table_exists(&TableName::new("bdms", "__migrations_history"))
            .unwrap());
    }

    #[test]
    fn test_rollback_discards_ddl() {
        let target = target();
        let table = TableName::new("main", "sample");
        target.begin().unwrap();
        target
            .execute(&TableDef::new("main.sample").column(ColumnDef::new("id", "INTEGER")).build())
            .unwrap();
        target.rollback().unwrap();
        assert!(!target.table_exists(&table).unwrap());
    }

    #[test]
    fn test_existing_table_is_schema_conflict() {
        let target = target();
        let create = TableDef::new("main.sample")
            .column(ColumnDef::new("id", "INTEGER"))
            .build();
        target.execute(&create).unwrap();
        let err = target.execute(&create).unwrap_err();
        assert!(err.is_schema_conflict(), "unexpected error: {}", err);
    }

    #[test]
    fn test_duplicate_key_is_data_integrity_violation() {
        let target = target();
        target
            .execute(
                &TableDef::new("main.codes")
                    .column(ColumnDef::new("id", "INTEGER").not_null())
                    .primary_key(&["id"])
                    .build(),
            )
            .unwrap();
        let insert = Operation::insert("main.codes", &["id"], vec![vec![SqlValue::Int(25000000)]]);
        target.execute(&insert).unwrap();
        let err = target.execute(&insert).unwrap_err();
        assert!(err.is_data_integrity_violation(), "unexpected error: {}", err);
    }

    #[test]
    fn test_count_rows_with_filter() {
        let target = target();
        target
            .execute(&TableDef::new("main.codes").column(ColumnDef::new("id", "INTEGER")).build())
            .unwrap();
        target
            .execute(&Operation::insert(
                "main.codes",
                &["id"],
                vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)], vec![SqlValue::Null]],
            ))
            .unwrap();
        let table = TableName::new("main", "codes");
        assert_eq!(target.count_rows(&table, None).unwrap(), 3);
        assert_eq!(target.count_rows(&table, Some(&Predicate::eq("id", 2))).unwrap(), 1);
        assert_eq!(target.count_rows(&table, Some(&Predicate::is_null("id"))).unwrap(), 1);
        assert!(target.column_exists(&table, "id").unwrap());
        assert!(!target.column_exists(&table, "name").unwrap());
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(is_retryable_error("IO Error: Could not set lock on file: Resource temporarily unavailable"));
        assert!(!is_retryable_error("Catalog Error: Table with name x does not exist"));
    }
}
