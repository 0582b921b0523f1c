//! Configuration management
//!
//! Settings live in `settings.json` in the data directory:
//! ```json
//! {
//!   "migrate": {
//!     "connection": "/var/lib/bdms/boreholes.duckdb",
//!     "ledgerSchema": "bdms",
//!     "ledgerTable": "__migrations_history",
//!     "lockTimeoutSecs": 30,
//!     "maxBackups": 10
//!   }
//! }
//! ```
//! Environment variables override the file; CLI flags override both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::{LedgerTable, IN_MEMORY};
use crate::domain::result::{Error, Result};
use crate::migrations;

pub const ENV_CONNECTION: &str = "BDMS_CONNECTION";
pub const ENV_LEDGER_SCHEMA: &str = "BDMS_LEDGER_SCHEMA";
pub const ENV_LEDGER_TABLE: &str = "BDMS_LEDGER_TABLE";

const DEFAULT_DB_FILENAME: &str = "boreholes.duckdb";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BACKUPS: usize = 10;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    migrate: MigrateSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_backups: Option<usize>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// DuckDB database file, or `:memory:`
    pub connection: String,
    pub ledger: LedgerTable,
    pub lock_timeout: Duration,
    pub max_backups: usize,
    // Keep the raw settings for preservation when saving
    raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the data directory, then apply environment overrides
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |key| std::env::var(key).ok())
    }

    fn load_with_env(data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings_path = data_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", settings_path.display(), e)))?
        } else {
            SettingsFile::default()
        };

        let settings = &raw.migrate;
        let default_ledger = LedgerTable::default();

        let connection = env(ENV_CONNECTION)
            .or_else(|| settings.connection.clone())
            .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILENAME).to_string_lossy().into_owned());
        let ledger = LedgerTable::new(
            env(ENV_LEDGER_SCHEMA)
                .or_else(|| settings.ledger_schema.clone())
                .unwrap_or(default_ledger.schema),
            env(ENV_LEDGER_TABLE)
                .or_else(|| settings.ledger_table.clone())
                .unwrap_or(default_ledger.table),
        );

        let config = Self {
            connection,
            ledger,
            lock_timeout: Duration::from_secs(settings.lock_timeout_secs.unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS)),
            max_backups: settings.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS),
            raw_settings: raw,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.connection.trim().is_empty() {
            return Err(Error::Config("connection must not be empty".to_string()));
        }
        if self.ledger.schema.trim().is_empty() || self.ledger.table.trim().is_empty() {
            return Err(Error::Config("ledger schema and table must not be empty".to_string()));
        }
        // DuckDB names a file's catalog after its stem, so a stem equal to a
        // schema name makes every reference to that schema ambiguous
        if let Some(stem) = self.db_path().as_deref().and_then(Path::file_stem).and_then(|s| s.to_str()) {
            for schema in [self.ledger.schema.as_str(), migrations::SCHEMA] {
                if stem.eq_ignore_ascii_case(schema) {
                    return Err(Error::Config(format!(
                        "database file {} shares its name with schema '{}'; rename the file",
                        self.connection, schema
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply a `--connection` flag
    pub fn with_connection(mut self, connection: Option<String>) -> Result<Self> {
        if let Some(c) = connection {
            self.connection = c;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn is_in_memory(&self) -> bool {
        self.connection == IN_MEMORY
    }

    /// Database file, `None` for in-memory connections
    pub fn db_path(&self) -> Option<PathBuf> {
        (!self.is_in_memory()).then(|| PathBuf::from(&self.connection))
    }

    /// Save config to the data directory.
    /// Preserves settings this tool doesn't manage.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_else(|_| self.raw_settings.clone())
        } else {
            self.raw_settings.clone()
        };

        settings.migrate.connection = Some(self.connection.clone());
        settings.migrate.ledger_schema = Some(self.ledger.schema.clone());
        settings.migrate.ledger_table = Some(self.ledger.table.clone());
        settings.migrate.lock_timeout_secs = Some(self.lock_timeout.as_secs());
        settings.migrate.max_backups = Some(self.max_backups);

        std::fs::write(&settings_path, serde_json::to_string_pretty(&settings)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();

        assert_eq!(PathBuf::from(&config.connection), dir.path().join("boreholes.duckdb"));
        assert_eq!(config.ledger, LedgerTable::default());
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert_eq!(config.max_backups, 10);
        assert!(!config.is_in_memory());
    }

    #[test]
    fn test_env_overrides_file_and_flag_overrides_env() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"migrate": {"connection": "from-file.duckdb", "ledgerTable": "history", "maxBackups": 3}}"#,
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), |key| match key {
            ENV_CONNECTION => Some("from-env.duckdb".to_string()),
            ENV_LEDGER_SCHEMA => Some("ops".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.connection, "from-env.duckdb");
        assert_eq!(config.ledger, LedgerTable::new("ops", "history"));
        assert_eq!(config.max_backups, 3);

        let config = config.with_connection(Some(":memory:".to_string())).unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.db_path(), None);
    }

    #[test]
    fn test_database_file_named_after_a_schema_is_rejected() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();

        let clash = dir.path().join("bdms.duckdb").to_string_lossy().into_owned();
        assert!(matches!(config.clone().with_connection(Some(clash)), Err(Error::Config(_))));

        let ledger_clash = Config::load_with_env(dir.path(), |key| match key {
            ENV_LEDGER_SCHEMA => Some("ops".to_string()),
            ENV_CONNECTION => Some("/data/OPS.duckdb".to_string()),
            _ => None,
        });
        assert!(matches!(ledger_clash, Err(Error::Config(_))));

        let fine = dir.path().join("boreholes.duckdb").to_string_lossy().into_owned();
        assert!(config.with_connection(Some(fine)).is_ok());
    }

    #[test]
    fn test_invalid_settings_is_a_config_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{not json").unwrap();
        assert!(matches!(Config::load_with_env(dir.path(), no_env), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"ui": {"theme": "dark"}, "migrate": {"maxBackups": 3, "retainLogsDays": 30}}"#,
        )
        .unwrap();

        let mut config = Config::load_with_env(dir.path(), no_env).unwrap();
        config.max_backups = 5;
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("settings.json")).unwrap()).unwrap();
        assert_eq!(saved["ui"]["theme"], "dark");
        assert_eq!(saved["migrate"]["retainLogsDays"], 30);
        assert_eq!(saved["migrate"]["maxBackups"], 5);
    }
}
