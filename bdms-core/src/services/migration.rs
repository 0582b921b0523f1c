//! Migration service - applies and reverts compiled-in migrations
//!
//! Each migration runs in its own transaction: its primitives and its ledger
//! write commit together or not at all. The ledger is what makes bulk data
//! primitives safe: a migration is recorded on completion and never re-run.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{MigrationCatalog, MigrationDefinition, MigrationId, MigrationRecord};
use crate::ports::MigrationTarget;

/// Result of applying pending migrations
#[derive(Debug, Serialize)]
pub struct MigrationResult {
    /// Ids of newly applied migrations, in application order
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

impl MigrationResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Result of reverting migrations
#[derive(Debug, Serialize)]
pub struct RevertResult {
    /// Ids of reverted migrations, most recent first
    pub reverted: Vec<String>,
    /// Ledger rows left after the revert
    pub remaining: usize,
}

impl RevertResult {
    pub fn reverted_count(&self) -> usize {
        self.reverted.len()
    }
}

/// Progress notifications emitted while a run executes
#[derive(Debug)]
pub enum MigrationEvent<'e> {
    Applying(&'e MigrationId),
    Applied { id: &'e MigrationId, elapsed: Duration },
    Reverting(&'e MigrationId),
    Reverted { id: &'e MigrationId, elapsed: Duration },
    Failed { id: &'e MigrationId, error: &'e Error },
}

/// Migrations selected for a revert, checked but not yet executed
#[derive(Debug)]
pub struct RevertPlan<'d> {
    /// Most recent first
    pub definitions: Vec<&'d MigrationDefinition>,
    applied_before: usize,
}

impl RevertPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.id.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Applied,
    Pending,
}

/// Status of one compiled-in migration
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub state: MigrationState,
    pub applied_at: Option<NaiveDateTime>,
    /// The definition changed after it was applied
    pub drifted: bool,
    pub irreversible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub entries: Vec<StatusEntry>,
    /// Ledger ids with no compiled-in definition
    pub unknown: Vec<String>,
}

impl MigrationStatus {
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state == MigrationState::Pending).count()
    }

    pub fn applied_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state == MigrationState::Applied).count()
    }
}

type Observer<'a> = &'a dyn Fn(&MigrationEvent<'_>);

/// Service for applying and reverting migrations against a target
pub struct MigrationService<'a> {
    target: &'a dyn MigrationTarget,
    catalog: &'a MigrationCatalog,
    product_version: String,
    observer: Option<Observer<'a>>,
}

impl<'a> MigrationService<'a> {
    pub fn new(target: &'a dyn MigrationTarget, catalog: &'a MigrationCatalog) -> Self {
        Self {
            target,
            catalog,
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            observer: None,
        }
    }

    /// Version written to `product_version` of new ledger rows
    pub fn with_product_version(mut self, version: impl Into<String>) -> Self {
        self.product_version = version.into();
        self
    }

    pub fn with_observer(mut self, observer: Observer<'a>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: MigrationEvent<'_>) {
        if let Some(observer) = self.observer {
            observer(&event);
        }
    }

    /// Apply every pending migration in ascending id order
    pub fn run_pending(&self) -> Result<MigrationResult> {
        self.run_pending_until(None)
    }

    /// Apply pending migrations up to and including `until`.
    ///
    /// Stops at the first failure; the failing migration is rolled back and
    /// later pending migrations are not attempted.
    pub fn run_pending_until(&self, until: Option<&MigrationId>) -> Result<MigrationResult> {
        if let Some(id) = until {
            if !self.catalog.contains(id.as_str()) {
                return Err(Error::UnknownMigration(id.to_string()));
            }
        }

        self.target.ensure_ledger()?;
        let records = self.target.applied()?;
        let applied_set: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

        for record in &records {
            if !self.catalog.contains(&record.id) {
                warn!(migration = %record.id, "ledger contains a migration that is not compiled in");
            }
        }

        let already_applied = self
            .catalog
            .definitions()
            .iter()
            .filter(|d| applied_set.contains(d.id.as_str()))
            .count();

        let mut newly_applied = Vec::new();
        for def in self.pending_in(&applied_set, until) {
            self.notify(MigrationEvent::Applying(&def.id));
            let started = Instant::now();
            if let Err(e) = self.apply_one(def) {
                self.notify(MigrationEvent::Failed { id: &def.id, error: &e });
                return Err(e);
            }
            let elapsed = started.elapsed();
            info!(migration = %def.id, elapsed_ms = elapsed.as_millis() as u64, "applied migration");
            self.notify(MigrationEvent::Applied { id: &def.id, elapsed });
            newly_applied.push(def.id.to_string());
        }

        Ok(MigrationResult {
            applied: newly_applied,
            already_applied,
        })
    }

    fn pending_in<'s>(
        &'s self,
        applied: &'s HashSet<&str>,
        until: Option<&'s MigrationId>,
    ) -> impl Iterator<Item = &'a MigrationDefinition> + 's {
        self.catalog
            .definitions()
            .iter()
            .filter(move |d| !applied.contains(d.id.as_str()))
            .filter(move |d| until.map_or(true, |u| d.id <= *u))
    }

    fn apply_one(&self, def: &MigrationDefinition) -> Result<()> {
        self.target.begin().map_err(|e| e.in_migration(def.id.as_str()))?;

        let outcome = def
            .up
            .iter()
            .try_for_each(|op| self.target.execute(op))
            .and_then(|_| {
                self.target
                    .record(&MigrationRecord::for_definition(def, &self.product_version))
            })
            .and_then(|_| self.target.commit());

        if let Err(e) = outcome {
            self.rollback_quietly(&def.id);
            return Err(e.in_migration(def.id.as_str()));
        }
        Ok(())
    }

    fn revert_one(&self, def: &MigrationDefinition) -> Result<()> {
        self.target.begin().map_err(|e| e.in_migration(def.id.as_str()))?;

        let outcome = def
            .down
            .iter()
            .try_for_each(|op| self.target.execute(op))
            .and_then(|_| self.target.forget(def.id.as_str()))
            .and_then(|_| self.target.commit());

        if let Err(e) = outcome {
            self.rollback_quietly(&def.id);
            return Err(e.in_migration(def.id.as_str()));
        }
        Ok(())
    }

    fn rollback_quietly(&self, id: &MigrationId) {
        if let Err(e) = self.target.rollback() {
            warn!(migration = %id, "rollback failed: {}", e);
        }
    }

    /// Revert the `steps` most recently applied migrations, newest first
    pub fn revert(&self, steps: usize) -> Result<RevertResult> {
        let plan = self.plan_revert(steps)?;
        self.execute_revert(plan)
    }

    /// Revert every applied migration newer than `target`
    pub fn revert_to(&self, target: &MigrationId) -> Result<RevertResult> {
        let plan = self.plan_revert_to(target)?;
        self.execute_revert(plan)
    }

    /// Select the `steps` most recent ledger entries without executing anything
    pub fn plan_revert(&self, steps: usize) -> Result<RevertPlan<'a>> {
        if steps == 0 {
            return Err(Error::validation("revert needs at least one step"));
        }
        let mut records = self.applied_newest_first()?;
        let total = records.len();
        records.truncate(steps);
        self.resolve_plan(&records, total)
    }

    /// Select every ledger entry newer than `target` without executing anything
    pub fn plan_revert_to(&self, target: &MigrationId) -> Result<RevertPlan<'a>> {
        if !self.catalog.contains(target.as_str()) {
            return Err(Error::UnknownMigration(target.to_string()));
        }
        let mut records = self.applied_newest_first()?;
        let total = records.len();
        records.retain(|r| r.id.as_str() > target.as_str());
        self.resolve_plan(&records, total)
    }

    fn applied_newest_first(&self) -> Result<Vec<MigrationRecord>> {
        self.target.ensure_ledger()?;
        let mut records = self.target.applied()?;
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }

    /// Every selected migration is resolved and checked before any `down`
    /// runs, so an irreversible or unknown migration rejects the whole revert
    fn resolve_plan(&self, records: &[MigrationRecord], total: usize) -> Result<RevertPlan<'a>> {
        let mut definitions = Vec::with_capacity(records.len());
        for record in records {
            let def = self
                .catalog
                .get(&record.id)
                .ok_or_else(|| Error::UnknownMigration(record.id.clone()))?;
            if def.is_irreversible() {
                return Err(Error::IrreversibleMigration(def.id.to_string()));
            }
            definitions.push(def);
        }
        Ok(RevertPlan {
            definitions,
            applied_before: total,
        })
    }

    /// Run the `down` sequences of a plan, most recent first
    pub fn execute_revert(&self, plan: RevertPlan<'a>) -> Result<RevertResult> {
        let mut reverted = Vec::new();
        for def in &plan.definitions {
            self.notify(MigrationEvent::Reverting(&def.id));
            let started = Instant::now();
            if let Err(e) = self.revert_one(def) {
                self.notify(MigrationEvent::Failed { id: &def.id, error: &e });
                return Err(e);
            }
            let elapsed = started.elapsed();
            info!(migration = %def.id, elapsed_ms = elapsed.as_millis() as u64, "reverted migration");
            self.notify(MigrationEvent::Reverted { id: &def.id, elapsed });
            reverted.push(def.id.to_string());
        }

        Ok(RevertResult {
            remaining: plan.applied_before - reverted.len(),
            reverted,
        })
    }

    /// Get list of already applied migration records
    ///
    /// Read-only: a database without a ledger table has nothing applied,
    /// and the table is not created here.
    pub fn get_applied(&self) -> Result<Vec<MigrationRecord>> {
        if !self.target.ledger_exists()? {
            return Ok(Vec::new());
        }
        self.target.applied()
    }

    /// Get pending definitions in application order
    pub fn get_pending(&self) -> Result<Vec<&'a MigrationDefinition>> {
        let records = self.get_applied()?;
        let applied: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        Ok(self
            .catalog
            .definitions()
            .iter()
            .filter(|d| !applied.contains(d.id.as_str()))
            .collect())
    }

    /// Per-migration state, including checksum drift and unknown ledger rows
    pub fn status(&self) -> Result<MigrationStatus> {
        let records = self.get_applied()?;

        let entries = self
            .catalog
            .definitions()
            .iter()
            .map(|def| {
                let record = records.iter().find(|r| r.id == def.id.as_str());
                StatusEntry {
                    id: def.id.to_string(),
                    state: if record.is_some() {
                        MigrationState::Applied
                    } else {
                        MigrationState::Pending
                    },
                    applied_at: record.map(|r| r.applied_at),
                    drifted: record
                        .and_then(|r| r.checksum.as_deref())
                        .is_some_and(|sum| sum != def.checksum()),
                    irreversible: def.is_irreversible(),
                }
            })
            .collect();

        let unknown = records
            .iter()
            .filter(|r| !self.catalog.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();

        Ok(MigrationStatus { entries, unknown })
    }
}
