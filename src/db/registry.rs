use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::connectors::QueryEngine;
use super::schema::{parse_foreign_key, Column, Relationship, Schema, Table};

/// Errors raised while loading a schema source.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read schema file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid schema: {0}")]
    Invalid(String),

    #[error("Failed to introspect schema: {0}")]
    Introspection(String),
}

/// Immutable, validated view over a [`Schema`].
///
/// Table lookups are case-insensitive. Relationships are not stored; they are
/// derived from column foreign keys every time they are asked for.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Schema,
}

impl SchemaRegistry {
    /// Load and validate a schema JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SchemaError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let registry = Self::from_json_str(&text)?;
        log::info!(
            "Loaded schema with {} tables from {}",
            registry.schema.tables.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let schema: Schema = serde_json::from_str(text)?;
        Self::from_schema(schema)
    }

    /// Validate an in-memory schema. Malformed foreign keys are dropped with a
    /// warning; duplicate or empty names are rejected.
    pub fn from_schema(mut schema: Schema) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for table in &mut schema.tables {
            if table.name.trim().is_empty() {
                return Err(SchemaError::Invalid("table name must not be empty".to_string()));
            }
            if !seen.insert(table.name.to_ascii_lowercase()) {
                return Err(SchemaError::Invalid(format!(
                    "duplicate table name '{}'",
                    table.name
                )));
            }
            for column in &mut table.columns {
                if column.name.trim().is_empty() {
                    return Err(SchemaError::Invalid(format!(
                        "table '{}' has a column with an empty name",
                        table.name
                    )));
                }
                let malformed = column
                    .foreign_key
                    .as_deref()
                    .is_some_and(|fk| parse_foreign_key(fk).is_none());
                if malformed {
                    log::warn!(
                        "Invalid foreign key format on {}.{}: {:?}",
                        table.name,
                        column.name,
                        column.foreign_key
                    );
                    column.foreign_key = None;
                }
            }
        }
        Ok(Self { schema })
    }

    /// Build a schema by asking the engine what it holds.
    pub async fn introspect(
        engine: &dyn QueryEngine,
        database_name: &str,
    ) -> Result<Self, SchemaError> {
        let names = engine
            .list_tables()
            .await
            .map_err(|e| SchemaError::Introspection(e.to_string()))?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = engine
                .describe_table(&name)
                .await
                .map_err(|e| SchemaError::Introspection(e.to_string()))?;
            tables.push(Table {
                description: Some(format!("{} table", name)),
                columns: columns
                    .into_iter()
                    .map(|meta| Column {
                        description: None,
                        name: meta.name,
                        data_type: meta.data_type,
                        nullable: meta.nullable,
                        primary_key: meta.primary_key,
                        foreign_key: meta.foreign_key,
                    })
                    .collect(),
                name,
            });
        }

        log::info!("Introspected {} tables from the query engine", tables.len());
        Self::from_schema(Schema {
            database_name: database_name.to_string(),
            description: Some("Schema generated from the connected database".to_string()),
            tables,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.schema
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Table names in declaration order.
    pub fn list_tables(&self) -> Vec<String> {
        self.schema.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.get_table(name).is_some()
    }

    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.get_table(table)
            .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        let mut relationships = Vec::new();
        for table in &self.schema.tables {
            for column in &table.columns {
                let Some(reference) = column.foreign_key.as_deref() else {
                    continue;
                };
                match parse_foreign_key(reference) {
                    Some((to_table, to_column)) => relationships.push(Relationship {
                        from_table: table.name.clone(),
                        from_column: column.name.clone(),
                        to_table: to_table.to_string(),
                        to_column: to_column.to_string(),
                    }),
                    None => log::warn!("Invalid foreign key format: {}", reference),
                }
            }
        }
        relationships
    }

    /// Render the schema for inclusion in a prompt. The layout is stable for a
    /// given schema.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.push("# Database Schema\n".to_string());

        if let Some(description) = &self.schema.description {
            lines.push(format!("{}\n", description));
        }

        lines.push(format!(
            "\nThe database contains {} tables:\n",
            self.schema.tables.len()
        ));

        for table in &self.schema.tables {
            lines.push(format!("\n## Table: {}", table.name));
            if let Some(description) = &table.description {
                lines.push(format!("Description: {}", description));
            }

            lines.push("\nColumns:".to_string());
            for col in &table.columns {
                lines.push(describe_column(col));
            }
        }

        let relationships = self.relationships();
        if !relationships.is_empty() {
            lines.push("\n## Relationships".to_string());
            for rel in &relationships {
                lines.push(format!(
                    "- {}.{} -> {}.{}",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column
                ));
            }
        }

        lines.join("\n")
    }

    /// One line per table: `name (col, col) - description`.
    pub fn table_summary(&self) -> String {
        self.schema
            .tables
            .iter()
            .map(|table| {
                let cols = table
                    .columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                match &table.description {
                    Some(d) => format!("{} ({}) - {}", table.name, cols, d),
                    None => format!("{} ({})", table.name, cols),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn describe_column(col: &Column) -> String {
    let mut line = format!("- {} ({})", col.name, col.data_type);

    let mut attributes = Vec::new();
    if col.primary_key {
        attributes.push("PRIMARY KEY".to_string());
    }
    if let Some(fk) = &col.foreign_key {
        attributes.push(format!("FOREIGN KEY -> {}", fk));
    }
    if !col.nullable {
        attributes.push("NOT NULL".to_string());
    }
    if !attributes.is_empty() {
        line.push_str(&format!(" [{}]", attributes.join(", ")));
    }

    if let Some(description) = &col.description {
        line.push_str(&format!(" - {}", description));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"{
        "database_name": "shop",
        "description": "A small online shop",
        "tables": [
            {
                "name": "customers",
                "description": "People who place orders",
                "columns": [
                    {"name": "customer_id", "type": "INTEGER", "primary_key": true, "nullable": false},
                    {"name": "name", "type": "TEXT", "description": "Full name"}
                ]
            },
            {
                "name": "orders",
                "columns": [
                    {"name": "order_id", "type": "INTEGER", "primary_key": true, "nullable": false},
                    {"name": "customer_id", "type": "INTEGER", "foreign_key": "customers.customer_id"},
                    {"name": "total_amount", "type": "REAL"},
                    {"name": "legacy_ref", "type": "TEXT", "foreign_key": "not-a-reference"}
                ]
            }
        ]
    }"#;

    fn shop() -> SchemaRegistry {
        SchemaRegistry::from_json_str(SHOP).unwrap()
    }

    #[test]
    fn test_get_table_case_insensitive() {
        let reg = shop();
        assert_eq!(reg.get_table("CUSTOMERS").unwrap().name, "customers");
        assert!(reg.get_table("Orders").is_some());
        assert!(reg.get_table("products").is_none());
    }

    #[test]
    fn test_list_tables_declaration_order() {
        assert_eq!(shop().list_tables(), vec!["customers", "orders"]);
    }

    #[test]
    fn test_column_exists() {
        let reg = shop();
        assert!(reg.column_exists("orders", "TOTAL_AMOUNT"));
        assert!(!reg.column_exists("orders", "discount"));
        assert!(!reg.column_exists("products", "id"));
    }

    #[test]
    fn test_malformed_foreign_key_dropped() {
        let reg = shop();
        let orders = reg.get_table("orders").unwrap();
        let legacy = orders.columns.iter().find(|c| c.name == "legacy_ref").unwrap();
        assert_eq!(legacy.foreign_key, None);
        assert!(!reg.describe().contains("not-a-reference"));
    }

    #[test]
    fn test_relationships() {
        let rels = shop().relationships();
        assert_eq!(
            rels,
            vec![Relationship {
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_table: "customers".into(),
                to_column: "customer_id".into(),
            }]
        );
    }

    #[test]
    fn test_describe_layout() {
        let text = shop().describe();
        assert!(text.starts_with("# Database Schema\n"));
        assert!(text.contains("The database contains 2 tables:"));
        assert!(text.contains("## Table: customers\nDescription: People who place orders"));
        assert!(text.contains("- customer_id (INTEGER) [PRIMARY KEY, NOT NULL]"));
        assert!(text.contains("- name (TEXT) - Full name"));
        assert!(text.contains("- customer_id (INTEGER) [FOREIGN KEY -> customers.customer_id]"));
        assert!(text.ends_with("## Relationships\n- orders.customer_id -> customers.customer_id"));
    }

    #[test]
    fn test_describe_is_deterministic() {
        let reg = shop();
        assert_eq!(reg.describe(), reg.describe());
    }

    #[test]
    fn test_table_summary() {
        let summary = shop().table_summary();
        assert_eq!(
            summary.lines().next().unwrap(),
            "customers (customer_id, name) - People who place orders"
        );
        assert_eq!(
            summary.lines().nth(1).unwrap(),
            "orders (order_id, customer_id, total_amount, legacy_ref)"
        );
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let err = SchemaRegistry::from_json_str(
            r#"{"tables": [
                {"name": "users", "columns": []},
                {"name": "USERS", "columns": []}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(_)));
    }

    #[test]
    fn test_table_names_fold_ascii_case_only() {
        // Uniqueness and lookup share ASCII-only case folding.
        let registry = SchemaRegistry::from_json_str(
            r#"{"tables": [
                {"name": "Élèves", "columns": []},
                {"name": "élèves", "columns": []}
            ]}"#,
        )
        .unwrap();
        assert_eq!(registry.get_table("Élèves").unwrap().name, "Élèves");
        assert_eq!(registry.get_table("élèves").unwrap().name, "élèves");
        assert_eq!(registry.get_table("éLÈVES").map(|t| t.name.as_str()), None);
        assert_eq!(registry.get_table("ÉLèVES").unwrap().name, "Élèves");
    }

    #[test]
    fn test_missing_required_field() {
        let err = SchemaRegistry::from_json_str(r#"{"tables": [{"name": "users"}]}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_wrong_shape() {
        let err = SchemaRegistry::from_json_str(r#"{"tables": "users"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SchemaRegistry::load_from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, SchemaError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, SHOP).unwrap();
        let reg = SchemaRegistry::load_from_file(&path).unwrap();
        assert_eq!(reg.schema().database_name, "shop");
    }
}
