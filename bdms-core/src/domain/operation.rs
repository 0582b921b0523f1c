//! Operation vocabulary for migration definitions
//!
//! A migration's `up` and `down` are ordered lists of [`Operation`]s. The
//! vocabulary is the boundary between the runner (generic) and individual
//! migrations (specific): schema primitives (tables, columns, indexes,
//! foreign keys, raw SQL) and data primitives (insert, predicate update and
//! delete, bulk seed from an external data file).

use std::fmt;

use serde::Serialize;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::result::{Error, Result};
use super::value::SqlValue;

/// Optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }
}

impl From<&str> for TableName {
    /// Parses `schema.table` or `table`
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => TableName::new(schema, name),
            None => TableName::unqualified(s),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Column definition used by `CreateTable` and `AddColumn`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Raw SQL default expression
    pub default: Option<String>,
}

impl ColumnDef {
    /// Nullable column without default
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Referential action for `ON DELETE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    NoAction,
    Restrict,
    SetNull,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub principal_table: TableName,
    pub principal_columns: Vec<String>,
    pub on_delete: ReferentialAction,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        principal_table: impl Into<TableName>,
        principal_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns: vec![column.into()],
            principal_table: principal_table.into(),
            principal_columns: vec![principal_column.into()],
            on_delete: ReferentialAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}

/// Scans keyword tokens so leading comments and CTEs (`WITH x AS (...)
/// DELETE ...`) are seen. `ON DELETE`/`ON UPDATE` referential clauses are
/// not data changes.
fn sql_is_destructive(statement: &str) -> bool {
    let dialect = DuckDbDialect {};
    if Parser::parse_sql(&dialect, statement).is_err() {
        return true;
    }
    let Ok(tokens) = Tokenizer::new(&dialect, statement).tokenize() else {
        return true;
    };

    let keywords: Vec<Keyword> = tokens
        .iter()
        .filter_map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => Some(word.keyword),
            _ => None,
        })
        .collect();

    keywords.iter().enumerate().any(|(i, keyword)| match keyword {
        Keyword::DROP | Keyword::TRUNCATE => true,
        Keyword::DELETE | Keyword::UPDATE => i == 0 || keywords[i - 1] != Keyword::ON,
        _ => false,
    })
}

/// Row filter for predicate-based update and delete
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(String, SqlValue),
    In(String, Vec<SqlValue>),
    IsNull(String),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn any_of<V: Into<SqlValue>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }
}

/// Format of an external seed data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedFormat {
    /// Header row with column names, one row per record
    Csv,
    /// Array of objects sharing the same keys
    Json,
}

/// Reference data loaded from an external, versioned data file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedData {
    /// File name, for diagnostics
    pub name: String,
    pub format: SeedFormat,
    pub content: String,
}

/// Parsed seed rows, ready for a bulk insert
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl SeedData {
    pub fn csv(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: SeedFormat::Csv,
            content: content.into(),
        }
    }

    pub fn json(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: SeedFormat::Json,
            content: content.into(),
        }
    }

    /// Parse the file into rows
    pub fn rows(&self) -> Result<SeedRows> {
        match self.format {
            SeedFormat::Csv => self.csv_rows(),
            SeedFormat::Json => self.json_rows(),
        }
    }

    fn csv_rows(&self) -> Result<SeedRows> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(self.content.as_bytes());

        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        if columns.is_empty() {
            return Err(Error::seed(format!("{}: missing header row", self.name)));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != columns.len() {
                return Err(Error::seed(format!(
                    "{}: row {} has {} fields, expected {}",
                    self.name,
                    rows.len() + 1,
                    record.len(),
                    columns.len()
                )));
            }
            rows.push(record.iter().map(SqlValue::from_csv_field).collect());
        }

        Ok(SeedRows { columns, rows })
    }

    fn json_rows(&self) -> Result<SeedRows> {
        let records: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_str(&self.content)?;

        let Some(first) = records.first() else {
            return Ok(SeedRows {
                columns: Vec::new(),
                rows: Vec::new(),
            });
        };
        let columns: Vec<String> = first.keys().cloned().collect();

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            if record.len() != columns.len() {
                return Err(Error::seed(format!(
                    "{}: record {} has {} keys, expected {}",
                    self.name,
                    index + 1,
                    record.len(),
                    columns.len()
                )));
            }
            let mut row = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = record.get(column).ok_or_else(|| {
                    Error::seed(format!("{}: record {} is missing '{}'", self.name, index + 1, column))
                })?;
                row.push(serde_json::from_value::<SqlValue>(value.clone()).map_err(|_| {
                    Error::seed(format!(
                        "{}: record {} has a non-scalar value for '{}'",
                        self.name,
                        index + 1,
                        column
                    ))
                })?);
            }
            rows.push(row);
        }

        Ok(SeedRows { columns, rows })
    }
}

/// A single schema or data primitive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTable {
        table: TableName,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
        foreign_keys: Vec<ForeignKey>,
    },
    DropTable {
        table: TableName,
    },
    AddColumn {
        table: TableName,
        column: ColumnDef,
    },
    DropColumn {
        table: TableName,
        column: String,
    },
    RenameColumn {
        table: TableName,
        from: String,
        to: String,
    },
    CreateIndex {
        table: TableName,
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
    /// `table` is only used for schema qualification of the index
    DropIndex {
        table: TableName,
        name: String,
    },
    RenameIndex {
        table: TableName,
        from: String,
        to: String,
    },
    AddForeignKey {
        table: TableName,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: TableName,
        name: String,
    },
    /// Raw statement with positional `?` parameters
    Sql {
        statement: String,
        params: Vec<SqlValue>,
    },
    InsertRows {
        table: TableName,
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
    },
    UpdateRows {
        table: TableName,
        set: Vec<(String, SqlValue)>,
        filter: Predicate,
    },
    DeleteRows {
        table: TableName,
        filter: Predicate,
    },
    Seed {
        table: TableName,
        data: SeedData,
    },
}

impl Operation {
    pub fn drop_table(table: impl Into<TableName>) -> Self {
        Operation::DropTable { table: table.into() }
    }

    pub fn add_column(table: impl Into<TableName>, column: ColumnDef) -> Self {
        Operation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn drop_column(table: impl Into<TableName>, column: impl Into<String>) -> Self {
        Operation::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn rename_column(table: impl Into<TableName>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Operation::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn create_index(table: impl Into<TableName>, name: impl Into<String>, columns: &[&str]) -> Self {
        Operation::CreateIndex {
            table: table.into(),
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn create_unique_index(table: impl Into<TableName>, name: impl Into<String>, columns: &[&str]) -> Self {
        Operation::CreateIndex {
            table: table.into(),
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        }
    }

    pub fn drop_index(table: impl Into<TableName>, name: impl Into<String>) -> Self {
        Operation::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn rename_index(table: impl Into<TableName>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Operation::RenameIndex {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn add_foreign_key(table: impl Into<TableName>, foreign_key: ForeignKey) -> Self {
        Operation::AddForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    pub fn drop_foreign_key(table: impl Into<TableName>, name: impl Into<String>) -> Self {
        Operation::DropForeignKey {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn sql(statement: impl Into<String>) -> Self {
        Operation::Sql {
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    pub fn sql_with(statement: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Operation::Sql {
            statement: statement.into(),
            params,
        }
    }

    pub fn insert(table: impl Into<TableName>, columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        Operation::InsertRows {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub fn update(
        table: impl Into<TableName>,
        set: Vec<(&str, SqlValue)>,
        filter: Predicate,
    ) -> Self {
        Operation::UpdateRows {
            table: table.into(),
            set: set.into_iter().map(|(c, v)| (c.to_string(), v)).collect(),
            filter,
        }
    }

    pub fn delete(table: impl Into<TableName>, filter: Predicate) -> Self {
        Operation::DeleteRows {
            table: table.into(),
            filter,
        }
    }

    pub fn seed(table: impl Into<TableName>, data: SeedData) -> Self {
        Operation::Seed {
            table: table.into(),
            data,
        }
    }

    /// Whether this primitive can destroy existing data.
    ///
    /// Raw SQL is destructive when any statement in it deletes, updates,
    /// drops or truncates; SQL the DuckDB dialect cannot parse counts as
    /// destructive.
    pub fn is_destructive(&self) -> bool {
        match self {
            Operation::DropTable { .. }
            | Operation::DropColumn { .. }
            | Operation::UpdateRows { .. }
            | Operation::DeleteRows { .. } => true,
            Operation::Sql { statement, .. } => sql_is_destructive(statement),
            _ => false,
        }
    }

    /// Short human readable description
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table, .. } => format!("create table {}", table),
            Operation::DropTable { table } => format!("drop table {}", table),
            Operation::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            Operation::DropColumn { table, column } => format!("drop column {}.{}", table, column),
            Operation::RenameColumn { table, from, to } => {
                format!("rename column {}.{} to {}", table, from, to)
            }
            Operation::CreateIndex { name, table, .. } => format!("create index {} on {}", name, table),
            Operation::DropIndex { name, .. } => format!("drop index {}", name),
            Operation::RenameIndex { from, to, .. } => format!("rename index {} to {}", from, to),
            Operation::AddForeignKey { table, foreign_key } => {
                format!("add foreign key {} on {}", foreign_key.name, table)
            }
            Operation::DropForeignKey { table, name } => format!("drop foreign key {} on {}", name, table),
            Operation::Sql { statement, .. } => {
                let first_line = statement.trim().lines().next().unwrap_or_default();
                format!("sql: {}", first_line)
            }
            Operation::InsertRows { table, rows, .. } => format!("insert {} row(s) into {}", rows.len(), table),
            Operation::UpdateRows { table, .. } => format!("update rows in {}", table),
            Operation::DeleteRows { table, .. } => format!("delete rows from {}", table),
            Operation::Seed { table, data } => format!("seed {} from {}", table, data.name),
        }
    }
}

/// Builder for `CreateTable`
#[derive(Debug, Clone)]
pub struct TableDef {
    table: TableName,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn build(self) -> Operation {
        Operation::CreateTable {
            table: self.table,
            columns: self.columns,
            primary_key: self.primary_key,
            foreign_keys: self.foreign_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MigrationDefinition;

    #[test]
    fn test_table_name_parsing() {
        let t = TableName::from("bdms.layer");
        assert_eq!(t.schema.as_deref(), Some("bdms"));
        assert_eq!(t.name, "layer");
        assert_eq!(t.to_string(), "bdms.layer");

        let t = TableName::from("layer");
        assert!(t.schema.is_none());
    }

    #[test]
    fn test_destructive_classification() {
        assert!(Operation::drop_column("bdms.layer", "notes").is_destructive());
        assert!(Operation::delete("bdms.codelist", Predicate::eq("id", 1)).is_destructive());
        assert!(Operation::sql("  delete from bdms.layer").is_destructive());
        assert!(Operation::sql("ALTER TABLE bdms.layer DROP COLUMN notes").is_destructive());
        assert!(!Operation::sql("CREATE VIEW v AS SELECT 1").is_destructive());
        assert!(Operation::sql("-- drop merged code\nDELETE FROM bdms.codelist WHERE id = 15101045").is_destructive());
        assert!(Operation::sql(
            "WITH merged AS (SELECT id FROM bdms.codelist WHERE id = 15101045) \
             DELETE FROM bdms.codelist WHERE id IN (SELECT id FROM merged)"
        )
        .is_destructive());
        assert!(Operation::sql("/* cleanup */ TRUNCATE bdms.layer").is_destructive());
        assert!(!Operation::sql(
            "CREATE TABLE bdms.sample (id INTEGER, parent INTEGER REFERENCES bdms.parent(id) ON DELETE CASCADE)"
        )
        .is_destructive());
        assert!(!Operation::sql("SELECT 'DELETE' AS word").is_destructive());
        assert!(Operation::sql("this is not sql").is_destructive());
        assert!(!Operation::add_column("bdms.layer", ColumnDef::new("notes", "VARCHAR")).is_destructive());
        assert!(!Operation::rename_column("bdms.layer", "a", "b").is_destructive());
    }

    #[test]
    fn test_comment_prefixed_delete_without_down_is_irreversible() {
        let def = MigrationDefinition::builder("20230425130522_RemapLithologyCodes")
            .up(Operation::sql("-- drop merged code\nDELETE FROM bdms.codelist WHERE id = 15101045"))
            .build()
            .unwrap();
        assert!(def.is_irreversible());
    }

    #[test]
    fn test_csv_seed_rows() {
        let data = SeedData::csv(
            "codes.csv",
            "id,schema_name,text_cli_de\n25000000,hydrotest_kind,\"Pumpversuch, kurz\"\n25000001,hydrotest_kind,\n",
        );
        let rows = data.rows().unwrap();
        assert_eq!(rows.columns, vec!["id", "schema_name", "text_cli_de"]);
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0][0], SqlValue::Int(25000000));
        assert_eq!(rows.rows[0][2], SqlValue::Text("Pumpversuch, kurz".to_string()));
        assert_eq!(rows.rows[1][2], SqlValue::Null);
    }

    #[test]
    fn test_csv_seed_ragged_row_is_error() {
        let data = SeedData::csv("bad.csv", "id,name\n1,a,extra\n");
        assert!(data.rows().is_err());
    }

    #[test]
    fn test_json_seed_rows() {
        let data = SeedData::json(
            "codes.json",
            r#"[{"id": 1, "code": "a"}, {"id": 2, "code": null}]"#,
        );
        let rows = data.rows().unwrap();
        assert_eq!(rows.columns.len(), 2);
        assert_eq!(rows.rows.len(), 2);
        let code_idx = rows.columns.iter().position(|c| c == "code").unwrap();
        assert_eq!(rows.rows[1][code_idx], SqlValue::Null);
    }

    #[test]
    fn test_json_seed_mismatched_keys() {
        let data = SeedData::json("bad.json", r#"[{"id": 1, "code": "a"}, {"id": 2, "name": "b"}]"#);
        match data.rows() {
            Err(Error::Seed(msg)) => assert!(msg.contains("missing 'code'")),
            other => panic!("expected seed error, got {:?}", other),
        }
    }

    #[test]
    fn test_table_def_builder() {
        let op = TableDef::new("bdms.casing")
            .column(ColumnDef::new("id", "INTEGER").not_null())
            .column(ColumnDef::new("name", "VARCHAR"))
            .primary_key(&["id"])
            .build();
        match op {
            Operation::CreateTable { columns, primary_key, .. } => {
                assert_eq!(columns.len(), 2);
                assert_eq!(primary_key, vec!["id"]);
            }
            _ => panic!("expected CreateTable"),
        }
    }
}
