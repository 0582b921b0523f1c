//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    /// A DDL statement hit an object that already exists, is missing, or is
    /// in a state the migration did not expect (ledger and schema drifted).
    #[error("Schema conflict: {message} (statement: {statement})")]
    SchemaConflict { statement: String, message: String },

    /// A data statement violated a constraint.
    #[error("Data integrity violation: {message} (statement: {statement})")]
    DataIntegrityViolation { statement: String, message: String },

    #[error("Migration {0} is irreversible: its down sequence is empty but up makes destructive changes")]
    IrreversibleMigration(String),

    /// A primitive failed inside a migration; the migration was rolled back.
    #[error("Migration {id} failed")]
    MigrationFailed {
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Unknown migration: {0}")]
    UnknownMigration(String),

    #[error("Invalid migration id: {0}")]
    InvalidMigrationId(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Seed data error: {0}")]
    Seed(String),

    #[error("Database is locked by another migration run: {0}")]
    Locked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a seed data error
    pub fn seed(msg: impl Into<String>) -> Self {
        Self::Seed(msg.into())
    }

    /// Wrap an error with the id of the migration it happened in
    pub fn in_migration(self, id: impl Into<String>) -> Self {
        Self::MigrationFailed {
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// Id of the failing migration, if this error carries one
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::MigrationFailed { id, .. } => Some(id),
            Self::IrreversibleMigration(id) | Self::UnknownMigration(id) => Some(id),
            _ => None,
        }
    }

    /// The underlying error with any migration wrapper removed
    pub fn root(&self) -> &Error {
        match self {
            Self::MigrationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_schema_conflict(&self) -> bool {
        matches!(self.root(), Self::SchemaConflict { .. })
    }

    pub fn is_data_integrity_violation(&self) -> bool {
        matches!(self.root(), Self::DataIntegrityViolation { .. })
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_wrapper_keeps_root() {
        let err = Error::DataIntegrityViolation {
            statement: "INSERT INTO codelist".to_string(),
            message: "duplicate key".to_string(),
        }
        .in_migration("20230220095411_AddHydrogeologyCodelists");

        assert_eq!(err.migration_id(), Some("20230220095411_AddHydrogeologyCodelists"));
        assert!(err.is_data_integrity_violation());
        assert!(!err.is_schema_conflict());
        assert!(err.root().to_string().contains("duplicate key"));
        assert!(err.to_string().starts_with("Migration 20230220095411_AddHydrogeologyCodelists failed"));
    }

    #[test]
    fn test_irreversible_display() {
        let err = Error::IrreversibleMigration("20230425130522_RemapLithologyCodes".to_string());
        assert_eq!(err.migration_id(), Some("20230425130522_RemapLithologyCodes"));
        assert!(err.to_string().contains("irreversible"));
    }
}
