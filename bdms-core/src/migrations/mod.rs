//! BDMS schema migrations, compiled in
//!
//! Reference data lives in `seeds/` and is embedded with `include_str!`.
//! Shipped migrations are never edited; `status` reports drift if one is.
//!
//! Constraints of the DuckDB target shape these definitions: tables that
//! are altered later carry no primary key or index, indexes are only
//! created on tables that are never altered, and a migration never runs
//! DDL on a table after changing its rows in the same transaction.

use crate::domain::result::Result;
use crate::domain::{
    ColumnDef, MigrationCatalog, MigrationDefinition, Operation, Predicate, SeedData, SqlValue, TableDef,
};

/// Application schema every BDMS table lives in
pub const SCHEMA: &str = "bdms";

const CODELIST: &str = "bdms.codelist";
const USERS: &str = "bdms.users";
const BOREHOLE: &str = "bdms.borehole";
const STRATIGRAPHY: &str = "bdms.stratigraphy";
const LAYER: &str = "bdms.layer";
const CASING: &str = "bdms.casing";

const CODELIST_SEED: &str = include_str!("seeds/codelist_1_0_5.csv");
const HYDROGEOLOGY_SEED: &str = include_str!("seeds/hydrogeology_codelists.json");

const HYDROGEOLOGY_SCHEMAS: [&str; 2] = ["hydrogeology_observationtype", "hydrogeology_wateringress_qt"];

/// All BDMS migrations in application order
pub fn catalog() -> Result<MigrationCatalog> {
    MigrationCatalog::new(vec![
        migrate_to_1_0_5()?,
        unitise_change_tracking()?,
        add_hydrogeology_codelists()?,
        add_casing_table()?,
        remap_lithology_codes()?,
        add_borehole_workflow()?,
    ])
}

/// Change tracking columns as they were named before 2023
fn legacy_tracking(table: TableDef, suffix: &str, with_updater: bool) -> TableDef {
    let table = table
        .column(ColumnDef::new(format!("creator_{}", suffix), "INTEGER"))
        .column(ColumnDef::new(format!("creation_{}", suffix), "TIMESTAMP"));
    if with_updater {
        table
            .column(ColumnDef::new(format!("updater_{}", suffix), "INTEGER"))
            .column(ColumnDef::new(format!("update_{}", suffix), "TIMESTAMP"))
    } else {
        table
    }
}

fn migrate_to_1_0_5() -> Result<MigrationDefinition> {
    let codelist = TableDef::new(CODELIST)
        .column(ColumnDef::new("id", "INTEGER").not_null())
        .column(ColumnDef::new("schema_name", "VARCHAR").not_null())
        .column(ColumnDef::new("code", "VARCHAR").not_null())
        .column(ColumnDef::new("text_en", "VARCHAR").not_null())
        .column(ColumnDef::new("text_de", "VARCHAR"))
        .column(ColumnDef::new("text_fr", "VARCHAR"))
        .column(ColumnDef::new("text_it", "VARCHAR"))
        .column(ColumnDef::new("sort_order", "INTEGER"))
        .primary_key(&["id"]);

    let users = TableDef::new(USERS)
        .column(ColumnDef::new("id", "INTEGER").not_null())
        .column(ColumnDef::new("name", "VARCHAR").not_null())
        .column(ColumnDef::new("admin", "BOOLEAN").not_null().default_sql("false"))
        .primary_key(&["id"]);

    let borehole = legacy_tracking(
        TableDef::new(BOREHOLE)
            .column(ColumnDef::new("id", "INTEGER").not_null())
            .column(ColumnDef::new("original_name", "VARCHAR"))
            .column(ColumnDef::new("kind_id", "INTEGER"))
            .column(ColumnDef::new("restriction_id", "INTEGER")),
        "bho",
        true,
    );

    let stratigraphy = legacy_tracking(
        TableDef::new(STRATIGRAPHY)
            .column(ColumnDef::new("id", "INTEGER").not_null())
            .column(ColumnDef::new("borehole_id", "INTEGER").not_null())
            .column(ColumnDef::new("name", "VARCHAR"))
            .column(ColumnDef::new("is_primary", "BOOLEAN").default_sql("false")),
        "sti",
        false,
    );

    let layer = legacy_tracking(
        TableDef::new(LAYER)
            .column(ColumnDef::new("id", "INTEGER").not_null())
            .column(ColumnDef::new("stratigraphy_id", "INTEGER").not_null())
            .column(ColumnDef::new("depth_from", "DOUBLE"))
            .column(ColumnDef::new("depth_to", "DOUBLE"))
            .column(ColumnDef::new("lithology_id", "INTEGER")),
        "lay",
        true,
    );

    MigrationDefinition::builder("20220921092000_MigrateTo_1_0_5")
        .up(Operation::sql("CREATE SCHEMA IF NOT EXISTS bdms"))
        .up_all([codelist.build(), users.build(), borehole.build(), stratigraphy.build(), layer.build()])
        .up(Operation::seed(CODELIST, SeedData::csv("codelist_1_0_5.csv", CODELIST_SEED)))
        .up(Operation::insert(
            USERS,
            &["id", "name", "admin"],
            vec![vec![SqlValue::from(1), SqlValue::from("admin"), SqlValue::from(true)]],
        ))
        .down_all([
            Operation::drop_table(LAYER),
            Operation::drop_table(STRATIGRAPHY),
            Operation::drop_table(BOREHOLE),
            Operation::drop_table(USERS),
            Operation::drop_table(CODELIST),
        ])
        .build()
}

/// Renames the per-table `creator_xxx` style columns to shared names
fn unitise_change_tracking() -> Result<MigrationDefinition> {
    let renames: [(&str, &str, &[(&str, &str)]); 3] = [
        (
            BOREHOLE,
            "bho",
            &[("creator", "created_by_id"), ("creation", "created"), ("updater", "updated_by_id"), ("update", "updated")],
        ),
        (
            LAYER,
            "lay",
            &[("creator", "created_by_id"), ("creation", "created"), ("updater", "updated_by_id"), ("update", "updated")],
        ),
        (STRATIGRAPHY, "sti", &[("creator", "created_by_id"), ("creation", "created")]),
    ];

    let mut builder = MigrationDefinition::builder("20230130112413_UnitiseChangeTracking");
    let mut down = Vec::new();
    for (table, suffix, columns) in renames {
        for (prefix, unified) in columns {
            let legacy = format!("{}_{}", prefix, suffix);
            builder = builder.up(Operation::rename_column(table, legacy.clone(), *unified));
            down.push(Operation::rename_column(table, *unified, legacy));
        }
    }

    builder = builder
        .up(Operation::add_column(STRATIGRAPHY, ColumnDef::new("updated_by_id", "INTEGER")))
        .up(Operation::add_column(STRATIGRAPHY, ColumnDef::new("updated", "TIMESTAMP")));

    let mut reverse = vec![
        Operation::drop_column(STRATIGRAPHY, "updated"),
        Operation::drop_column(STRATIGRAPHY, "updated_by_id"),
    ];
    reverse.extend(down.into_iter().rev());

    builder.down_all(reverse).build()
}

fn add_hydrogeology_codelists() -> Result<MigrationDefinition> {
    MigrationDefinition::builder("20230220095411_AddHydrogeologyCodelists")
        .up(Operation::seed(
            CODELIST,
            SeedData::json("hydrogeology_codelists.json", HYDROGEOLOGY_SEED),
        ))
        .down(Operation::delete(CODELIST, Predicate::any_of("schema_name", HYDROGEOLOGY_SCHEMAS)))
        .build()
}

fn add_casing_table() -> Result<MigrationDefinition> {
    let casing = TableDef::new(CASING)
        .column(ColumnDef::new("id", "INTEGER").not_null())
        .column(ColumnDef::new("borehole_id", "INTEGER").not_null())
        .column(ColumnDef::new("name", "VARCHAR").not_null())
        .column(ColumnDef::new("kind_id", "INTEGER"))
        .column(ColumnDef::new("depth_from", "DOUBLE"))
        .column(ColumnDef::new("depth_to", "DOUBLE"))
        .column(ColumnDef::new("date_start", "DATE"))
        .column(ColumnDef::new("date_finish", "DATE"))
        .column(ColumnDef::new("created_by_id", "INTEGER"))
        .column(ColumnDef::new("created", "TIMESTAMP"))
        .column(ColumnDef::new("updated_by_id", "INTEGER"))
        .column(ColumnDef::new("updated", "TIMESTAMP"))
        .primary_key(&["id"]);

    let casing_kinds: Vec<Vec<SqlValue>> = [
        (25000200, "casing_kind_conductor", "conductor pipe", "Standrohr"),
        (25000201, "casing_kind_steel", "steel casing", "Stahlverrohrung"),
        (25000202, "casing_kind_pvc", "PVC casing", "PVC-Verrohrung"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (id, code, en, de))| {
        vec![
            SqlValue::from(id),
            SqlValue::from("casing_kind"),
            SqlValue::from(code),
            SqlValue::from(en),
            SqlValue::from(de),
            SqlValue::from(i as i64 + 1),
        ]
    })
    .collect();

    MigrationDefinition::builder("20230307140010_AddCasingTable")
        .up(casing.build())
        .up(Operation::create_index(CASING, "ix_casing_borehole_id", &["borehole_id"]))
        .up(Operation::insert(
            CODELIST,
            &["id", "schema_name", "code", "text_en", "text_de", "sort_order"],
            casing_kinds,
        ))
        .down(Operation::delete(CODELIST, Predicate::eq("schema_name", "casing_kind")))
        .down(Operation::drop_index(CASING, "ix_casing_borehole_id"))
        .down(Operation::drop_table(CASING))
        .build()
}

/// Merges "sandy gravel" into "gravelly sand". The removed code cannot be
/// told apart afterwards, so there is no down sequence.
fn remap_lithology_codes() -> Result<MigrationDefinition> {
    MigrationDefinition::builder("20230425130522_RemapLithologyCodes")
        .up(Operation::update(
            LAYER,
            vec![("lithology_id", SqlValue::from(15101046))],
            Predicate::eq("lithology_id", 15101045),
        ))
        .up(Operation::delete(CODELIST, Predicate::eq("id", 15101045)))
        .build()
}

fn add_borehole_workflow() -> Result<MigrationDefinition> {
    MigrationDefinition::builder("20230612083000_AddBoreholeWorkflow")
        .up(Operation::add_column(
            BOREHOLE,
            ColumnDef::new("workflow_status", "VARCHAR").default_sql("'draft'"),
        ))
        .up(Operation::sql_with(
            "UPDATE bdms.borehole SET workflow_status = ? WHERE workflow_status IS NULL",
            vec![SqlValue::from("draft")],
        ))
        .down(Operation::drop_column(BOREHOLE, "workflow_status"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_ordered_and_complete() {
        let catalog = catalog().unwrap();
        let ids: Vec<&str> = catalog.definitions().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "20220921092000_MigrateTo_1_0_5",
                "20230130112413_UnitiseChangeTracking",
                "20230220095411_AddHydrogeologyCodelists",
                "20230307140010_AddCasingTable",
                "20230425130522_RemapLithologyCodes",
                "20230612083000_AddBoreholeWorkflow",
            ]
        );
    }

    #[test]
    fn test_only_lithology_remap_is_irreversible() {
        let catalog = catalog().unwrap();
        let irreversible: Vec<&str> = catalog
            .definitions()
            .iter()
            .filter(|d| d.is_irreversible())
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(irreversible, vec!["20230425130522_RemapLithologyCodes"]);
    }

    #[test]
    fn test_seed_files_parse() {
        let codelist = SeedData::csv("codelist_1_0_5.csv", CODELIST_SEED).rows().unwrap();
        assert_eq!(codelist.columns[0], "id");
        assert!(codelist.rows.iter().any(|r| r[0] == SqlValue::Int(15101045)));

        let hydro = SeedData::json("hydrogeology_codelists.json", HYDROGEOLOGY_SEED).rows().unwrap();
        assert_eq!(hydro.rows.len(), 7);
        let id_col = hydro.columns.iter().position(|c| c == "id").unwrap();
        assert_eq!(hydro.rows[0][id_col], SqlValue::Int(25000000));
    }

    #[test]
    fn test_unitise_down_mirrors_up() {
        let def = unitise_change_tracking().unwrap();
        assert_eq!(def.up.len(), def.down.len());
        assert_eq!(
            def.down.last(),
            Some(&Operation::rename_column(BOREHOLE, "created_by_id", "creator_bho"))
        );
    }
}
