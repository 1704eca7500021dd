use super::{ConnectionConfig, QueryEngine};
use crate::db::schema::{ColumnMeta, Row};
use crate::validation::validate_identifier;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// SQLite query engine using rusqlite.
///
/// One connection is shared by every call; blocking work runs on the tokio
/// blocking pool.
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
    config: ConnectionConfig,
}

impl SqliteEngine {
    pub fn open(config: ConnectionConfig) -> anyhow::Result<Self> {
        let conn = if config.file_path == ":memory:" {
            Connection::open_in_memory().context("Failed to open in-memory database")?
        } else if config.read_only {
            Connection::open_with_flags(
                &config.file_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_context(|| format!("Failed to open {} read-only", config.file_path))?
        } else {
            Connection::open(&config.file_path)
                .with_context(|| format!("Failed to open {}", config.file_path))?
        };

        log::info!("Connected to SQLite at {}", config.file_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::open(ConnectionConfig::default())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Run a batch of statements (table setup, seed data). This bypasses
    /// validation and is not part of answering a question.
    pub async fn execute_script(&self, script: String) -> anyhow::Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            c.execute_batch(&script).context("Failed to run script")?;
            Ok(())
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn query_rows(&self, sql: String) -> anyhow::Result<Vec<Row>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let mut stmt = c.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut map = Row::new();
                for (i, name) in columns.iter().enumerate() {
                    map.insert(name.clone(), value_to_json(row.get_ref(i)?));
                }
                out.push(map);
            }
            Ok(out)
        })
        .await
        .context("spawn_blocking join error")?
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn execute(&self, sql: &str) -> anyhow::Result<Vec<Row>> {
        log::info!("Executing query: {}", sql);
        let rows = self.query_rows(sql.to_string()).await?;
        log::info!("Query returned {} rows", rows.len());
        Ok(rows)
    }

    async fn validate_syntax(&self, sql: &str) -> anyhow::Result<()> {
        let conn = self.conn.clone();
        let explain = format!("EXPLAIN {}", sql);
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            // Preparing compiles the statement against the live schema; it is never stepped.
            c.prepare(&explain)?;
            Ok(())
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn describe_table(&self, table_name: &str) -> anyhow::Result<Vec<ColumnMeta>> {
        let conn = self.conn.clone();
        let table = table_name.to_string();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;

            let mut fk_stmt = c
                .prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")
                .context("Failed to prepare foreign key query")?;
            let foreign_keys = fk_stmt
                .query_map([&table], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = c
                .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
                .context("Failed to prepare table info query")?;
            let columns = stmt
                .query_map([&table], |row| {
                    let name: String = row.get(0)?;
                    let not_null: i64 = row.get(2)?;
                    let pk: i64 = row.get(3)?;
                    Ok(ColumnMeta {
                        foreign_key: foreign_keys
                            .iter()
                            .find(|(from, _, _)| *from == name)
                            .map(|(_, target, to)| {
                                format!("{}.{}", target, to.clone().unwrap_or_else(|| "rowid".into()))
                            }),
                        name,
                        data_type: row.get(1)?,
                        nullable: not_null == 0,
                        primary_key: pk > 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if columns.is_empty() {
                anyhow::bail!("Table '{}' does not exist", table);
            }
            log::info!("Retrieved schema for table '{}': {} columns", table, columns.len());
            Ok(columns)
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn list_tables(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let mut stmt = c
                .prepare(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
                )
                .context("Failed to prepare table list query")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn sample(&self, table_name: &str, limit: u64) -> anyhow::Result<Vec<Row>> {
        validate_identifier(table_name).map_err(|e| anyhow!("{}", e))?;
        self.query_rows(format!("SELECT * FROM \"{}\" LIMIT {}", table_name, limit))
            .await
    }
}
