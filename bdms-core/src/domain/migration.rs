//! Migration domain model
//!
//! A [`MigrationDefinition`] is compiled into the program and never changes
//! once shipped. A [`MigrationRecord`] is the persistent ledger row written
//! when a definition's `up` sequence commits.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::operation::Operation;
use super::result::{Error, Result};

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{14})_([A-Z][A-Za-z0-9_]*)$").expect("migration id pattern is valid")
    })
}

/// Migration identifier: `yyyyMMddHHmmss_PascalCaseName`.
///
/// Ordering is plain string ordering, which for a fixed-width timestamp
/// prefix is timestamp order, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    pub fn parse(s: &str) -> Result<Self> {
        let caps = id_pattern()
            .captures(s)
            .ok_or_else(|| Error::InvalidMigrationId(format!("'{}' does not match yyyyMMddHHmmss_Name", s)))?;
        NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S")
            .map_err(|_| Error::InvalidMigrationId(format!("'{}' has an invalid timestamp", s)))?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Authoring timestamp embedded in the id
    pub fn timestamp(&self) -> NaiveDateTime {
        // Validated in parse()
        NaiveDateTime::parse_from_str(&self.0[..14], "%Y%m%d%H%M%S").unwrap_or_default()
    }

    /// Name part after the timestamp
    pub fn name(&self) -> &str {
        &self.0[15..]
    }
}

impl FromStr for MigrationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MigrationId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A compiled-in migration: a tagged pair of operation sequences
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationDefinition {
    pub id: MigrationId,
    pub up: Vec<Operation>,
    pub down: Vec<Operation>,
}

impl MigrationDefinition {
    /// Start building a definition; the id is validated by `build()`
    pub fn builder(id: &str) -> MigrationBuilder {
        MigrationBuilder {
            id: id.to_string(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// `down` is empty while `up` destroys data: reverting would silently
    /// lose what `up` removed, so the runner refuses to revert it
    pub fn is_irreversible(&self) -> bool {
        self.down.is_empty() && self.up.iter().any(Operation::is_destructive)
    }

    /// SHA-256 over the serialized operations, hex encoded
    pub fn checksum(&self) -> String {
        let payload = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&payload))
    }
}

pub struct MigrationBuilder {
    id: String,
    up: Vec<Operation>,
    down: Vec<Operation>,
}

impl MigrationBuilder {
    pub fn up(mut self, op: Operation) -> Self {
        self.up.push(op);
        self
    }

    pub fn down(mut self, op: Operation) -> Self {
        self.down.push(op);
        self
    }

    pub fn up_all(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.up.extend(ops);
        self
    }

    pub fn down_all(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.down.extend(ops);
        self
    }

    pub fn build(self) -> Result<MigrationDefinition> {
        Ok(MigrationDefinition {
            id: MigrationId::parse(&self.id)?,
            up: self.up,
            down: self.down,
        })
    }
}

/// A ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub applied_at: NaiveDateTime,
    pub product_version: Option<String>,
    pub checksum: Option<String>,
}

impl MigrationRecord {
    /// Record for a definition that has just been applied
    pub fn for_definition(definition: &MigrationDefinition, product_version: &str) -> Self {
        Self {
            id: definition.id.to_string(),
            applied_at: Utc::now().naive_utc(),
            product_version: Some(product_version.to_string()),
            checksum: Some(definition.checksum()),
        }
    }
}

/// The validated, ordered set of compiled-in definitions
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    definitions: Vec<MigrationDefinition>,
}

impl MigrationCatalog {
    /// Sorts by id and rejects duplicates
    pub fn new(mut definitions: Vec<MigrationDefinition>) -> Result<Self> {
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        let mut seen = HashSet::new();
        for def in &definitions {
            if !seen.insert(def.id.as_str()) {
                return Err(Error::validation(format!("duplicate migration id {}", def.id)));
            }
        }
        Ok(Self { definitions })
    }

    /// Definitions in ascending id order
    pub fn definitions(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&MigrationDefinition> {
        self.definitions
            .binary_search_by(|d| d.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.definitions[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn last(&self) -> Option<&MigrationDefinition> {
        self.definitions.last()
    }
}
