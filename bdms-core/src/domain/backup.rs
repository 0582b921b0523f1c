//! Safety backup domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest stored inside every backup archive as `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Database file name inside the archive
    pub database: String,
    /// Most recent ledger entry when the backup was taken
    pub latest_migration: Option<String>,
    pub product_version: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata for a backup archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Archive filename (e.g., "bdms-2025-01-15T10-30-00-000123.zip")
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Ledger head recorded in the manifest, if readable
    pub latest_migration: Option<String>,
}

impl BackupMetadata {
    /// Format size for human display
    pub fn size_display(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.1} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.1} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.1} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_display() {
        let meta = BackupMetadata {
            name: "bdms-test.zip".to_string(),
            created_at: Utc::now(),
            size_bytes: 1536,
            latest_migration: None,
        };
        assert_eq!(meta.size_display(), "1.5 KB");

        let meta = BackupMetadata {
            size_bytes: 2 * 1024 * 1024,
            ..meta
        };
        assert_eq!(meta.size_display(), "2.0 MB");
    }
}
