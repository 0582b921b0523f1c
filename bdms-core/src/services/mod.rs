//! Service layer - migration use cases
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case.

mod backup;
pub mod lint;
mod lock;
pub mod logging;
pub mod migration;
mod script;

pub use backup::BackupService;
pub use lint::{Finding, LintReport, LintService, Severity};
pub use lock::RunLock;
pub use logging::{LogEntry, LogEvent, LoggingService};
pub use migration::{
    MigrationEvent, MigrationResult, MigrationService, MigrationState, MigrationStatus, RevertPlan, RevertResult,
    StatusEntry,
};
pub use script::ScriptService;
