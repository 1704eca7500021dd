pub mod sqlite;

use crate::db::schema::{ColumnMeta, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection configuration for the query engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database file, or `:memory:`.
    pub file_path: String,
    pub read_only: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            file_path: ":memory:".to_string(),
            read_only: false,
        }
    }
}

/// The tabular engine questions are answered against.
///
/// Identifiers are case-sensitive here; callers that want case-insensitive
/// matching do it against the schema registry.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute a statement and return every row it produces
    async fn execute(&self, sql: &str) -> anyhow::Result<Vec<Row>>;

    /// Check that a statement would compile, without running it.
    /// The error carries the engine's message.
    async fn validate_syntax(&self, sql: &str) -> anyhow::Result<()>;

    /// Column metadata for a table
    async fn describe_table(&self, table_name: &str) -> anyhow::Result<Vec<ColumnMeta>>;

    /// User table names in creation order
    async fn list_tables(&self) -> anyhow::Result<Vec<String>>;

    /// First `limit` rows of a table
    async fn sample(&self, table_name: &str, limit: u64) -> anyhow::Result<Vec<Row>>;
}
