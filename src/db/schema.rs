use serde::{Deserialize, Serialize};

/// The complete description of the database the pipeline answers questions about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tables: Vec<Table>,
}

fn default_database_name() -> String {
    "database".to_string()
}

/// A single table in the schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<Column>,
}

/// A column in a table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Referenced column in `table.column` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

fn default_nullable() -> bool {
    true
}

/// A foreign-key edge derived from a column's `foreign_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Split a `table.column` reference. Anything other than exactly two
/// non-empty parts is rejected.
pub fn parse_foreign_key(reference: &str) -> Option<(&str, &str)> {
    let mut parts = reference.split('.');
    let table = parts.next()?.trim();
    let column = parts.next()?.trim();
    if parts.next().is_some() || table.is_empty() || column.is_empty() {
        return None;
    }
    Some((table, column))
}

/// Column metadata as reported by the query engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub foreign_key: Option<String>,
}

/// A result row as an ordered map of column names to JSON values
pub type Row = serde_json::Map<String, serde_json::Value>;
