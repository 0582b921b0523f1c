//! Backup service - safety backups of the target database
//!
//! A backup is a ZIP archive holding the database file and a
//! `manifest.json` describing the ledger head at the time it was taken.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::domain::result::{Error, Result};
use crate::domain::{BackupManifest, BackupMetadata};

const MANIFEST_NAME: &str = "manifest.json";
const BACKUP_PREFIX: &str = "bdms-";
const PRE_RESTORE_PREFIX: &str = "bdms-pre-restore-";

fn zip_err(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(io) => Error::Io(io),
        other => Error::database(format!("backup archive: {}", other)),
    }
}

/// Backup service for the target database file
pub struct BackupService {
    backups_dir: PathBuf,
    db_path: PathBuf,
}

impl BackupService {
    pub fn new(backups_dir: PathBuf, db_path: PathBuf) -> Self {
        Self { backups_dir, db_path }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn db_filename(&self) -> String {
        self.db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("boreholes.duckdb")
            .to_string()
    }

    /// Archive the database file. The caller checkpoints the database first
    /// so the file holds every committed change.
    pub fn create(&self, latest_migration: Option<String>, max_backups: Option<usize>) -> Result<BackupMetadata> {
        let metadata = self.write_archive(BACKUP_PREFIX, latest_migration)?;
        info!(backup = %metadata.name, "created backup");

        if let Some(max) = max_backups {
            self.apply_retention(max)?;
        }
        Ok(metadata)
    }

    fn write_archive(&self, prefix: &str, latest_migration: Option<String>) -> Result<BackupMetadata> {
        if !self.db_path.exists() {
            return Err(Error::validation(format!(
                "database file not found: {}",
                self.db_path.display()
            )));
        }
        fs::create_dir_all(&self.backups_dir)?;

        let now = Utc::now();
        let name = format!(
            "{}{}-{:06}.zip",
            prefix,
            now.format("%Y-%m-%dT%H-%M-%S"),
            now.timestamp_subsec_micros()
        );
        let path = self.backups_dir.join(&name);

        let manifest = BackupManifest {
            database: self.db_filename(),
            latest_migration: latest_migration.clone(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: now,
        };

        let mut zip = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(manifest.database.as_str(), options).map_err(zip_err)?;
        let mut db_file = File::open(&self.db_path)?;
        io::copy(&mut db_file, &mut zip)?;

        zip.start_file(MANIFEST_NAME, options).map_err(zip_err)?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        zip.finish().map_err(zip_err)?;

        Ok(BackupMetadata {
            name,
            created_at: now,
            size_bytes: fs::metadata(&path)?.len(),
            latest_migration,
        })
    }

    /// List backups, newest first
    pub fn list(&self) -> Result<Vec<BackupMetadata>> {
        if !self.backups_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backups_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(".zip") {
                continue;
            }

            let manifest = Self::read_manifest(&path).ok();
            backups.push(BackupMetadata {
                name: name.to_string(),
                created_at: manifest
                    .as_ref()
                    .map(|m| m.created_at)
                    .unwrap_or_else(|| parse_backup_time(name)),
                size_bytes: fs::metadata(&path)?.len(),
                latest_migration: manifest.and_then(|m| m.latest_migration),
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    fn read_manifest(path: &Path) -> Result<BackupManifest> {
        let mut archive = ZipArchive::new(File::open(path)?).map_err(zip_err)?;
        let mut entry = archive.by_name(MANIFEST_NAME).map_err(zip_err)?;
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the database file with the archived copy.
    ///
    /// The database must not be open. The current file is archived first
    /// under a `bdms-pre-restore-` name, and a stale WAL file is removed so
    /// it is not replayed onto the restored database.
    pub fn restore(&self, backup_name: &str) -> Result<BackupMetadata> {
        let backup_path = self.backups_dir.join(backup_name);
        if !backup_path.exists() {
            return Err(Error::validation(format!("backup not found: {}", backup_name)));
        }
        let manifest = Self::read_manifest(&backup_path)?;

        if self.db_path.exists() {
            let pre = self.write_archive(PRE_RESTORE_PREFIX, None)?;
            info!(backup = %pre.name, "archived current database before restore");
        }

        let mut archive = ZipArchive::new(File::open(&backup_path)?).map_err(zip_err)?;
        let mut entry = archive.by_name(&manifest.database).map_err(zip_err)?;
        let mut out = File::create(&self.db_path)?;
        io::copy(&mut entry, &mut out)?;
        out.flush()?;

        let mut wal = self.db_path.clone().into_os_string();
        wal.push(".wal");
        let wal = PathBuf::from(wal);
        if wal.exists() {
            fs::remove_file(&wal)?;
        }

        info!(backup = %backup_name, "restored database");
        Ok(BackupMetadata {
            name: backup_name.to_string(),
            created_at: manifest.created_at,
            size_bytes: fs::metadata(&backup_path)?.len(),
            latest_migration: manifest.latest_migration,
        })
    }

    fn apply_retention(&self, max_backups: usize) -> Result<()> {
        let mut backups = self.list()?;
        while backups.len() > max_backups {
            if let Some(oldest) = backups.pop() {
                let path = self.backups_dir.join(&oldest.name);
                if let Err(e) = fs::remove_file(&path) {
                    warn!(backup = %oldest.name, "failed to remove old backup: {}", e);
                }
            }
        }
        Ok(())
    }
}

/// Creation time from a backup file name, for archives without a readable manifest
fn parse_backup_time(name: &str) -> DateTime<Utc> {
    name.strip_prefix(PRE_RESTORE_PREFIX)
        .or_else(|| name.strip_prefix(BACKUP_PREFIX))
        .and_then(|s| s.strip_suffix(".zip"))
        .and_then(|ts| NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H-%M-%S-%f").ok())
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn service(dir: &Path) -> BackupService {
        let db_path = dir.join("boreholes.duckdb");
        fs::write(&db_path, b"original").unwrap();
        BackupService::new(dir.join("backups"), db_path)
    }

    #[test]
    fn test_create_and_list() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        let created = service
            .create(Some("20230130112413_UnitiseChangeTracking".to_string()), None)
            .unwrap();
        assert!(created.name.starts_with("bdms-"));

        let listed = service.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, created.name);
        assert_eq!(
            listed[0].latest_migration.as_deref(),
            Some("20230130112413_UnitiseChangeTracking")
        );
    }

    #[test]
    fn test_retention_keeps_newest() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());

        for _ in 0..3 {
            service.create(None, Some(2)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(service.list().unwrap().len(), 2);
    }

    #[test]
    fn test_restore_replaces_database() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        let backup = service.create(None, None).unwrap();

        fs::write(dir.path().join("boreholes.duckdb"), b"changed").unwrap();
        fs::write(dir.path().join("boreholes.duckdb.wal"), b"stale").unwrap();

        service.restore(&backup.name).unwrap();

        assert_eq!(fs::read(dir.path().join("boreholes.duckdb")).unwrap(), b"original");
        assert!(!dir.path().join("boreholes.duckdb.wal").exists());
        let names: Vec<String> = service.list().unwrap().into_iter().map(|b| b.name).collect();
        assert!(names.iter().any(|n| n.starts_with("bdms-pre-restore-")));
    }

    #[test]
    fn test_restore_missing_backup() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        assert!(matches!(service.restore("bdms-nope.zip"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_create_without_database_fails() {
        let dir = tempdir().unwrap();
        let service = BackupService::new(dir.path().join("backups"), dir.path().join("missing.duckdb"));
        assert!(service.create(None, None).is_err());
    }

    #[test]
    fn test_parse_backup_time() {
        let time = parse_backup_time("bdms-2025-01-15T10-30-00-000123.zip");
        assert_eq!(time.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-15 10:30:00");
        assert_eq!(parse_backup_time("bdms-garbage.zip"), DateTime::<Utc>::default());
    }
}
