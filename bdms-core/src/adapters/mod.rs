//! Adapters - concrete implementations of ports
//!
//! - DuckDB: migration target (MigrationTarget port)
//! - SQL: statement rendering for the operation vocabulary

pub mod duckdb;
pub mod sql;
