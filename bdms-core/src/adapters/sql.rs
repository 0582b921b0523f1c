//! SQL rendering for the operation vocabulary
//!
//! Produces DuckDB / PostgreSQL compatible statements with positional `?`
//! parameters. Executed statements always bind parameters; inline literals
//! are only used when writing migration scripts.

use crate::domain::result::{Error, Result};
use crate::domain::{ColumnDef, ForeignKey, Operation, Predicate, ReferentialAction, SqlValue, TableName};

/// A single SQL statement with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Statement text with every `?` placeholder outside quoted sections
    /// replaced by the matching literal
    pub fn to_inline_sql(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut params = self.params.iter();
        let mut quote: Option<char> = None;

        for c in self.sql.chars() {
            match (quote, c) {
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (None, '?') => match params.next() {
                    Some(value) => out.push_str(&value.to_literal()),
                    None => out.push('?'),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

/// Quote an identifier, doubling embedded quotes
/// Text form of ledger timestamps, cast to `TIMESTAMP` on insert
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quoted, optionally schema-qualified table name
pub fn qualified(table: &TableName) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

fn qualified_index(table: &TableName, name: &str) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => quote_ident(name),
    }
}

fn ident_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

fn column_sql(column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.data_type);
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    sql
}

fn foreign_key_sql(fk: &ForeignKey) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        ident_list(&fk.columns),
        qualified(&fk.principal_table),
        ident_list(&fk.principal_columns)
    );
    // NO ACTION is the SQL default; spelling it out is rejected by some engines
    if fk.on_delete != ReferentialAction::NoAction {
        sql.push_str(" ON DELETE ");
        sql.push_str(fk.on_delete.as_sql());
    }
    sql
}

/// Render a predicate, appending its parameters to `params`
fn predicate_sql(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    match predicate {
        Predicate::Eq(column, SqlValue::Null) | Predicate::IsNull(column) => {
            format!("{} IS NULL", quote_ident(column))
        }
        Predicate::Eq(column, value) => {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column))
        }
        Predicate::In(_, values) if values.is_empty() => "FALSE".to_string(),
        Predicate::In(column, values) => {
            params.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({})", quote_ident(column), placeholders)
        }
        Predicate::And(parts) if parts.is_empty() => "TRUE".to_string(),
        Predicate::And(parts) => parts
            .iter()
            .map(|p| format!("({})", predicate_sql(p, params)))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

/// Render a `WHERE`-less filter with its parameters
pub fn filter(predicate: &Predicate) -> Statement {
    let mut params = Vec::new();
    let sql = predicate_sql(predicate, &mut params);
    Statement { sql, params }
}

fn insert_statements(table: &TableName, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<Vec<Statement>> {
    if columns.is_empty() {
        return if rows.is_empty() {
            Ok(Vec::new())
        } else {
            Err(Error::validation(format!("insert into {} has rows but no columns", table)))
        };
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(table),
        ident_list(columns),
        vec!["?"; columns.len()].join(", ")
    );

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != columns.len() {
                return Err(Error::validation(format!(
                    "insert into {}: row {} has {} values for {} columns",
                    table,
                    i + 1,
                    row.len(),
                    columns.len()
                )));
            }
            Ok(Statement {
                sql: sql.clone(),
                params: row.clone(),
            })
        })
        .collect()
}

/// Render one primitive into the statements that implement it
pub fn render(op: &Operation) -> Result<Vec<Statement>> {
    let statements = match op {
        Operation::CreateTable {
            table,
            columns,
            primary_key,
            foreign_keys,
        } => {
            if columns.is_empty() {
                return Err(Error::validation(format!("create table {} has no columns", table)));
            }
            let mut parts: Vec<String> = columns.iter().map(column_sql).collect();
            if !primary_key.is_empty() {
                parts.push(format!("PRIMARY KEY ({})", ident_list(primary_key)));
            }
            parts.extend(foreign_keys.iter().map(foreign_key_sql));
            vec![Statement::plain(format!(
                "CREATE TABLE {} ({})",
                qualified(table),
                parts.join(", ")
            ))]
        }
        Operation::DropTable { table } => vec![Statement::plain(format!("DROP TABLE {}", qualified(table)))],
        Operation::AddColumn { table, column } => vec![Statement::plain(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualified(table),
            column_sql(column)
        ))],
        Operation::DropColumn { table, column } => vec![Statement::plain(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified(table),
            quote_ident(column)
        ))],
        Operation::RenameColumn { table, from, to } => vec![Statement::plain(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            qualified(table),
            quote_ident(from),
            quote_ident(to)
        ))],
        Operation::CreateIndex {
            table,
            name,
            columns,
            unique,
        } => vec![Statement::plain(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if *unique { "UNIQUE " } else { "" },
            quote_ident(name),
            qualified(table),
            ident_list(columns)
        ))],
        Operation::DropIndex { table, name } => {
            vec![Statement::plain(format!("DROP INDEX {}", qualified_index(table, name)))]
        }
        Operation::RenameIndex { table, from, to } => vec![Statement::plain(format!(
            "ALTER INDEX {} RENAME TO {}",
            qualified_index(table, from),
            quote_ident(to)
        ))],
        Operation::AddForeignKey { table, foreign_key } => vec![Statement::plain(format!(
            "ALTER TABLE {} ADD {}",
            qualified(table),
            foreign_key_sql(foreign_key)
        ))],
        Operation::DropForeignKey { table, name } => vec![Statement::plain(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            qualified(table),
            quote_ident(name)
        ))],
        Operation::Sql { statement, params } => vec![Statement {
            sql: statement.clone(),
            params: params.clone(),
        }],
        Operation::InsertRows { table, columns, rows } => insert_statements(table, columns, rows)?,
        Operation::UpdateRows { table, set, filter } => {
            if set.is_empty() {
                return Err(Error::validation(format!("update of {} sets no columns", table)));
            }
            let mut params: Vec<SqlValue> = set.iter().map(|(_, v)| v.clone()).collect();
            let assignments = set
                .iter()
                .map(|(c, _)| format!("{} = ?", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let where_sql = predicate_sql(filter, &mut params);
            vec![Statement {
                sql: format!("UPDATE {} SET {} WHERE {}", qualified(table), assignments, where_sql),
                params,
            }]
        }
        Operation::DeleteRows { table, filter } => {
            let mut params = Vec::new();
            let where_sql = predicate_sql(filter, &mut params);
            vec![Statement {
                sql: format!("DELETE FROM {} WHERE {}", qualified(table), where_sql),
                params,
            }]
        }
        Operation::Seed { table, data } => {
            let seed = data.rows()?;
            insert_statements(table, &seed.columns, &seed.rows)?
        }
    };
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SeedData, TableDef};

    fn single(op: &Operation) -> Statement {
        let mut statements = render(op).unwrap();
        assert_eq!(statements.len(), 1);
        statements.remove(0)
    }

    #[test]
    fn test_create_table_with_foreign_key() {
        let op = TableDef::new("bdms.casing")
            .column(ColumnDef::new("id", "INTEGER").not_null())
            .column(ColumnDef::new("borehole_id", "INTEGER").not_null())
            .column(ColumnDef::new("kind", "VARCHAR").default_sql("'steel'"))
            .primary_key(&["id"])
            .foreign_key(
                ForeignKey::new("fk_casing_borehole", "borehole_id", "bdms.borehole", "id")
                    .on_delete(ReferentialAction::Cascade),
            )
            .build();
        assert_eq!(
            single(&op).sql,
            "CREATE TABLE \"bdms\".\"casing\" (\"id\" INTEGER NOT NULL, \"borehole_id\" INTEGER NOT NULL, \
             \"kind\" VARCHAR DEFAULT 'steel', PRIMARY KEY (\"id\"), CONSTRAINT \"fk_casing_borehole\" \
             FOREIGN KEY (\"borehole_id\") REFERENCES \"bdms\".\"borehole\" (\"id\") ON DELETE CASCADE)"
        );
    }

    #[test]
    fn test_no_action_foreign_key_omits_clause() {
        let op = Operation::add_foreign_key(
            "bdms.layer",
            ForeignKey::new("fk_layer_stratigraphy", "stratigraphy_id", "bdms.stratigraphy", "id"),
        );
        let sql = single(&op).sql;
        assert!(sql.starts_with("ALTER TABLE \"bdms\".\"layer\" ADD CONSTRAINT \"fk_layer_stratigraphy\""));
        assert!(!sql.contains("ON DELETE"));
    }

    #[test]
    fn test_schema_primitives() {
        assert_eq!(
            single(&Operation::rename_column("bdms.layer", "creator_lay", "created_by_id")).sql,
            "ALTER TABLE \"bdms\".\"layer\" RENAME COLUMN \"creator_lay\" TO \"created_by_id\""
        );
        assert_eq!(
            single(&Operation::create_unique_index("bdms.codelist", "ix_codelist_code", &["schema_name", "code"])).sql,
            "CREATE UNIQUE INDEX \"ix_codelist_code\" ON \"bdms\".\"codelist\" (\"schema_name\", \"code\")"
        );
        assert_eq!(
            single(&Operation::drop_index("bdms.casing", "ix_casing_borehole_id")).sql,
            "DROP INDEX \"bdms\".\"ix_casing_borehole_id\""
        );
        assert_eq!(
            single(&Operation::rename_index("bdms.casing", "ix_old", "ix_new")).sql,
            "ALTER INDEX \"bdms\".\"ix_old\" RENAME TO \"ix_new\""
        );
        assert_eq!(
            single(&Operation::drop_foreign_key("bdms.layer", "fk_layer_stratigraphy")).sql,
            "ALTER TABLE \"bdms\".\"layer\" DROP CONSTRAINT \"fk_layer_stratigraphy\""
        );
    }

    #[test]
    fn test_update_binds_set_then_filter_params() {
        let op = Operation::update(
            "bdms.layer",
            vec![("lithology_id", SqlValue::Int(15101044))],
            Predicate::And(vec![
                Predicate::eq("lithology_id", 15101045),
                Predicate::is_null("deleted"),
            ]),
        );
        let stmt = single(&op);
        assert_eq!(
            stmt.sql,
            "UPDATE \"bdms\".\"layer\" SET \"lithology_id\" = ? WHERE (\"lithology_id\" = ?) AND (\"deleted\" IS NULL)"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(15101044), SqlValue::Int(15101045)]);
    }

    #[test]
    fn test_delete_with_in_predicate() {
        let op = Operation::delete("bdms.codelist", Predicate::any_of("id", [1, 2, 3]));
        let stmt = single(&op);
        assert_eq!(stmt.sql, "DELETE FROM \"bdms\".\"codelist\" WHERE \"id\" IN (?, ?, ?)");
        assert_eq!(stmt.params.len(), 3);

        let empty = Operation::delete("bdms.codelist", Predicate::In("id".to_string(), vec![]));
        assert_eq!(single(&empty).sql, "DELETE FROM \"bdms\".\"codelist\" WHERE FALSE");
    }

    #[test]
    fn test_insert_renders_one_statement_per_row() {
        let op = Operation::insert(
            "bdms.codelist",
            &["id", "schema_name"],
            vec![
                vec![SqlValue::Int(1), SqlValue::from("a")],
                vec![SqlValue::Int(2), SqlValue::from("b")],
            ],
        );
        let statements = render(&op).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].params[1], SqlValue::from("b"));

        let ragged = Operation::insert("bdms.codelist", &["id", "schema_name"], vec![vec![SqlValue::Int(1)]]);
        assert!(matches!(render(&ragged), Err(Error::Validation(_))));
    }

    #[test]
    fn test_seed_renders_inserts() {
        let op = Operation::seed(
            "bdms.codelist",
            SeedData::csv("codes.csv", "id,schema_name\n25000000,hydrotest_kind\n"),
        );
        let statements = render(&op).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].to_inline_sql(),
            "INSERT INTO \"bdms\".\"codelist\" (\"id\", \"schema_name\") VALUES (25000000, 'hydrotest_kind')"
        );
    }

    #[test]
    fn test_inline_skips_quoted_question_marks() {
        let stmt = Statement {
            sql: "UPDATE t SET note = 'why?' WHERE id = ? AND \"odd?\" = ?".to_string(),
            params: vec![SqlValue::Int(7), SqlValue::from("it's")],
        };
        assert_eq!(
            stmt.to_inline_sql(),
            "UPDATE t SET note = 'why?' WHERE id = 7 AND \"odd?\" = 'it''s'"
        );
    }
}
