//! Logging service - structured event logging to DuckDB
//!
//! Stores command and migration events in `logs.duckdb` in the data
//! directory. Only migration ids, command names and error text are logged,
//! never row data from the target database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::DuckDbTarget;
use crate::log_migrations;
use crate::services::migration::MigrationService;

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Timestamp in the upper bits, a per-process counter in the lower 16
fn generate_id() -> i64 {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (now_ms() << 16) | counter as i64
}

/// Current unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn detect_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// A log event to be recorded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_migration(mut self, id: impl Into<String>) -> Self {
        self.migration_id = Some(id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as i64);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Set error details (source chain, failing statement)
    pub fn with_error_details(mut self, details: impl Into<String>) -> Self {
        self.error_details = Some(details.into());
        self
    }
}

/// A log entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: i64,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub command: Option<String>,
    pub migration_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
}

const ENTRY_COLUMNS: &str = "id, timestamp, app_version, platform, event, command, migration_id, \
                             duration_ms, error_message, error_details";

fn entry_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        app_version: row.get(2)?,
        platform: row.get(3)?,
        event: row.get(4)?,
        command: row.get(5)?,
        migration_id: row.get(6)?,
        duration_ms: row.get(7)?,
        error_message: row.get(8)?,
        error_details: row.get(9)?,
    })
}

/// Service for structured event logging
pub struct LoggingService {
    target: DuckDbTarget,
    db_path: PathBuf,
    app_version: String,
    platform: &'static str,
}

impl LoggingService {
    /// Opens or creates logs.duckdb in the data directory and brings its
    /// schema up to date
    pub fn new(data_dir: &Path, app_version: impl Into<String>) -> Result<Self> {
        let db_path = data_dir.join("logs.duckdb");
        let target = DuckDbTarget::open(&db_path.to_string_lossy(), log_migrations::ledger())
            .with_context(|| format!("Failed to open {}", db_path.display()))?;

        let service = Self {
            target,
            db_path,
            app_version: app_version.into(),
            platform: detect_platform(),
        };
        service.run_migrations()?;
        Ok(service)
    }

    fn run_migrations(&self) -> Result<()> {
        let catalog = log_migrations::catalog()?;
        MigrationService::new(&self.target, &catalog)
            .with_product_version(self.app_version.clone())
            .run_pending()
            .context("Failed to migrate the event log")?;
        Ok(())
    }

    /// Record an event; version and platform are filled in by the service
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let conn = self.target.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                log_migrations::LOG_TABLE,
                ENTRY_COLUMNS
            ),
            duckdb::params![
                generate_id(),
                now_ms(),
                &self.app_version,
                self.platform,
                &event.event,
                &event.command,
                &event.migration_id,
                &event.duration_ms,
                &event.error_message,
                &event.error_details,
            ],
        )?;
        Ok(())
    }

    pub fn log_command(&self, command: &str) -> Result<()> {
        self.log(LogEvent::new("command_executed").with_command(command))
    }

    pub fn log_migration_applied(&self, id: &str, duration: Duration) -> Result<()> {
        self.log(LogEvent::new("migration_applied").with_migration(id).with_duration(duration))
    }

    pub fn log_migration_reverted(&self, id: &str, duration: Duration) -> Result<()> {
        self.log(LogEvent::new("migration_reverted").with_migration(id).with_duration(duration))
    }

    pub fn log_migration_failed(&self, id: &str, message: &str, details: Option<&str>) -> Result<()> {
        let mut event = LogEvent::new("migration_failed").with_migration(id).with_error(message);
        if let Some(d) = details {
            event = event.with_error_details(d);
        }
        self.log(event)
    }

    pub fn log_revert_rejected(&self, id: &str, message: &str) -> Result<()> {
        self.log(LogEvent::new("revert_rejected").with_migration(id).with_error(message))
    }

    /// Most recent entries first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries("", limit)
    }

    /// Most recent entries carrying an error
    pub fn get_errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries("WHERE error_message IS NOT NULL", limit)
    }

    /// Entries for one migration id
    pub fn get_for_migration(&self, id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.target.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE migration_id = ? ORDER BY id DESC LIMIT ?",
            ENTRY_COLUMNS,
            log_migrations::LOG_TABLE
        ))?;
        let entries = stmt
            .query_map(duckdb::params![id, limit as i64], entry_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn query_entries(&self, filter: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.target.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} {} ORDER BY id DESC LIMIT ?",
            ENTRY_COLUMNS,
            log_migrations::LOG_TABLE,
            filter
        ))?;
        let entries = stmt
            .query_map([limit as i64], entry_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Get the total number of log entries
    pub fn count(&self) -> Result<u64> {
        let conn = self.target.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", log_migrations::LOG_TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Number of entries per event name, most frequent first
    pub fn event_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.target.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT event, COUNT(*) FROM {} GROUP BY event ORDER BY COUNT(*) DESC, event",
            log_migrations::LOG_TABLE
        ))?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(counts)
    }

    /// Delete logs older than the specified timestamp (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.target.conn()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE timestamp < ?", log_migrations::LOG_TABLE),
            [timestamp_ms],
        )?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_logging_service_creation() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), "1.0.0").unwrap();

        assert!(service.db_path().exists());
        assert_eq!(service.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_does_not_rerun_log_migrations() {
        let dir = tempdir().unwrap();
        {
            let service = LoggingService::new(dir.path(), "1.0.0").unwrap();
            service.log_command("status").unwrap();
        }
        let service = LoggingService::new(dir.path(), "1.0.1").unwrap();
        assert_eq!(service.count().unwrap(), 1);
    }

    #[test]
    fn test_log_migration_events() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), "1.0.0").unwrap();

        service.log_command("update").unwrap();
        service
            .log_migration_applied("20220921092000_MigrateTo_1_0_5", Duration::from_millis(42))
            .unwrap();

        let entries = service.get_recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "migration_applied");
        assert_eq!(entries[0].migration_id.as_deref(), Some("20220921092000_MigrateTo_1_0_5"));
        assert_eq!(entries[0].duration_ms, Some(42));
        assert_eq!(entries[0].app_version, "1.0.0");
        assert_eq!(entries[1].command.as_deref(), Some("update"));
    }

    #[test]
    fn test_log_failure() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), "1.0.0").unwrap();

        service
            .log_migration_failed(
                "20230130112413_UnitiseChangeTracking",
                "Schema conflict",
                Some("column creator_lay does not exist"),
            )
            .unwrap();
        service
            .log_revert_rejected("20230425130522_RemapLithologyCodes", "irreversible")
            .unwrap();

        let errors = service.get_errors(10).unwrap();
        assert_eq!(errors.len(), 2);
        let failed = service
            .get_for_migration("20230130112413_UnitiseChangeTracking", 10)
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event, "migration_failed");
        assert_eq!(failed[0].error_details.as_deref(), Some("column creator_lay does not exist"));
    }

    #[test]
    fn test_count_stats_and_delete() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), "1.0.0").unwrap();

        service.log_command("update").unwrap();
        service.log_command("status").unwrap();
        service.log(LogEvent::new("migration_applied")).unwrap();

        assert_eq!(service.count().unwrap(), 3);
        let stats = service.event_counts().unwrap();
        assert_eq!(stats[0], ("command_executed".to_string(), 2));
        assert_eq!(stats[1], ("migration_applied".to_string(), 1));

        let deleted = service.delete_before(now_ms() + 1000).unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(service.count().unwrap(), 0);
    }
}
