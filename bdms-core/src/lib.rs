//! BDMS Core - migration ledger and runner for the borehole data store
//!
//! This crate follows hexagonal architecture:
//!
//! - **domain**: migration ids, definitions, ledger records, the operation vocabulary
//! - **ports**: the [`MigrationTarget`](ports::MigrationTarget) trait the runner drives
//! - **adapters**: SQL rendering and the DuckDB target
//! - **services**: runner, lint, script, run lock, backups, event log
//! - **migrations**: the compiled-in BDMS catalog

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::Path;

use adapters::duckdb::DuckDbTarget;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::{
    BackupMetadata, MigrationCatalog, MigrationDefinition, MigrationId, MigrationRecord, Operation,
};
pub use domain::result::{Error, Result};
pub use services::{LogEntry, LogEvent, LoggingService};

/// Main context for migration commands
///
/// Holds the resolved configuration, the open target, the catalog and,
/// for locked contexts, the run lock until the context is dropped.
pub struct MigrationContext {
    pub config: Config,
    pub target: DuckDbTarget,
    pub catalog: MigrationCatalog,
    /// `None` for in-memory targets
    pub backup_service: Option<BackupService>,
    _lock: Option<RunLock>,
}

impl MigrationContext {
    /// Open the target for read-only commands
    pub fn open(config: Config, data_dir: &Path) -> Result<Self> {
        Self::open_with(config, data_dir, migrations::catalog()?, false)
    }

    /// Take the run lock, then open the target. Used by commands that
    /// change the schema.
    pub fn open_locked(config: Config, data_dir: &Path) -> Result<Self> {
        Self::open_with(config, data_dir, migrations::catalog()?, true)
    }

    /// Open with an explicit catalog
    pub fn open_with(config: Config, data_dir: &Path, catalog: MigrationCatalog, lock: bool) -> Result<Self> {
        let db_path = config.db_path();

        let run_lock = match (&db_path, lock) {
            (Some(path), true) => Some(RunLock::acquire(path, config.lock_timeout)?),
            _ => None,
        };

        let target = DuckDbTarget::open(&config.connection, config.ledger.clone())?;
        let backup_service = db_path.map(|path| BackupService::new(data_dir.join("backups"), path));

        Ok(Self {
            config,
            target,
            catalog,
            backup_service,
            _lock: run_lock,
        })
    }

    /// Runner over this context's target and catalog
    pub fn migrations(&self) -> MigrationService<'_> {
        MigrationService::new(&self.target, &self.catalog)
    }

    pub fn lint(&self) -> LintReport {
        LintService::new(&self.catalog).run()
    }

    /// SQL script for the whole catalog, or only for pending migrations
    pub fn script(&self, pending_only: bool) -> Result<String> {
        let definitions: Vec<&MigrationDefinition> = if pending_only {
            self.migrations().get_pending()?
        } else {
            self.catalog.definitions().iter().collect()
        };
        ScriptService::new(&self.config.ledger).render(&definitions)
    }

    /// Checkpoint and archive the database file; `None` for in-memory targets
    pub fn backup(&self) -> Result<Option<BackupMetadata>> {
        let Some(backups) = &self.backup_service else {
            return Ok(None);
        };
        self.target.checkpoint()?;
        let latest = self.migrations().get_applied()?.into_iter().map(|r| r.id).max();
        backups.create(latest, Some(self.config.max_backups)).map(Some)
    }
}
