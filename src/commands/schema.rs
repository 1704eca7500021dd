use serde::{Deserialize, Serialize};

use super::SharedPipeline;
use crate::db::schema::{Column, ColumnMeta, Row};

const SAMPLE_ROWS: u64 = 5;

/// Declared and live view of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDetails {
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<Column>,
    /// Columns as the engine reports them.
    pub schema: Vec<ColumnMeta>,
    pub sample_data: Vec<Row>,
}

/// Return the table names declared in the schema.
pub async fn list_tables(pipeline: &SharedPipeline) -> Result<Vec<String>, String> {
    let guard = pipeline.lock().await;
    Ok(guard.registry().list_tables())
}

/// Return the rendered schema text the model sees.
pub async fn get_schema_info(pipeline: &SharedPipeline) -> Result<String, String> {
    let guard = pipeline.lock().await;
    Ok(guard.registry().describe())
}

/// Return declared columns, engine metadata and a few sample rows.
pub async fn get_table_info(
    pipeline: &SharedPipeline,
    table_name: &str,
) -> Result<TableDetails, String> {
    let guard = pipeline.lock().await;
    let table = guard
        .registry()
        .get_table(table_name)
        .cloned()
        .ok_or_else(|| format!("Table '{}' not found in schema", table_name))?;

    let engine = guard.engine();
    let schema = engine
        .describe_table(&table.name)
        .await
        .map_err(|e| e.to_string())?;
    let sample_data = engine
        .sample(&table.name, SAMPLE_ROWS)
        .await
        .map_err(|e| e.to_string())?;

    Ok(TableDetails {
        name: table.name,
        description: table.description,
        columns: table.columns,
        schema,
        sample_data,
    })
}
