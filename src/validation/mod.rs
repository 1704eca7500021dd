pub mod identifier;
pub mod lexer;
pub mod metrics;

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::connectors::QueryEngine;
use crate::db::registry::SchemaRegistry;

pub use identifier::{validate_identifier, IdentifierError};
pub use lexer::{extract_table_names, LexError};
pub use metrics::{estimate_complexity, ComplexityLevel, QueryMetrics};

/// Which gate rejected a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Safety,
    Syntax,
    SchemaReference,
}

/// Reasons a generated statement is refused.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    UnsafePattern(&'static str),
    Syntax(String),
    UnknownTable { table: String, known: Vec<String> },
    StatementType(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnsafePattern(pattern) => {
                write!(f, "Query contains potentially dangerous pattern: {}", pattern)
            }
            ValidationError::Syntax(reason) => write!(f, "Invalid SQL syntax: {}", reason),
            ValidationError::UnknownTable { table, known } => write!(
                f,
                "Table '{}' not found in schema. Available tables: {}",
                table,
                known.join(", ")
            ),
            ValidationError::StatementType(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn stage(&self) -> ValidationStage {
        match self {
            ValidationError::UnsafePattern(_) | ValidationError::StatementType(_) => {
                ValidationStage::Safety
            }
            ValidationError::Syntax(_) => ValidationStage::Syntax,
            ValidationError::UnknownTable { .. } => ValidationStage::SchemaReference,
        }
    }
}

/// Serializable pass/fail summary of a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error: Option<String>,
}

impl From<Result<(), ValidationError>> for ValidationOutcome {
    fn from(result: Result<(), ValidationError>) -> Self {
        match result {
            Ok(()) => ValidationOutcome {
                valid: true,
                error: None,
            },
            Err(e) => ValidationOutcome {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Statements the pipeline must never let through, checked in order.
static DENY_LIST: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("DROP", r"(?i)\bDROP\b"),
        ("TRUNCATE", r"(?i)\bTRUNCATE\b"),
        ("ALTER", r"(?i)\bALTER\b"),
        ("CREATE", r"(?i)\bCREATE\b"),
        ("GRANT", r"(?i)\bGRANT\b"),
        ("REVOKE", r"(?i)\bREVOKE\b"),
        ("DELETE ... WHERE 1=1", r"(?is)\bDELETE\b.*\bWHERE\s+1\s*=\s*1\b"),
        ("multiple statements", r";\s*\S"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

/// Stage 1: reject anything that could mutate the database.
pub fn check_safety(sql: &str) -> Result<(), ValidationError> {
    for (label, regex) in DENY_LIST.iter() {
        if regex.is_match(sql) {
            log::warn!("Query contains potentially dangerous pattern: {}", label);
            return Err(ValidationError::UnsafePattern(*label));
        }
    }
    Ok(())
}

/// Stage 3: every FROM/JOIN target must be a known table. Skipped when the
/// statement cannot be scanned.
pub fn check_schema_references(
    sql: &str,
    registry: &SchemaRegistry,
) -> Result<(), ValidationError> {
    let referenced = match extract_table_names(sql) {
        Ok(tables) => tables,
        Err(e) => {
            log::debug!("Schema reference validation skipped: {}", e);
            return Ok(());
        }
    };

    for table in referenced {
        if !registry.table_exists(&table) {
            let err = ValidationError::UnknownTable {
                table,
                known: registry.list_tables(),
            };
            log::warn!("{}", err);
            return Err(err);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// Classify a statement by its leading keyword. `WITH` counts as a SELECT.
pub fn statement_kind(sql: &str) -> Option<StatementKind> {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()?
        .to_uppercase();
    match head.as_str() {
        "SELECT" | "WITH" => Some(StatementKind::Select),
        "INSERT" => Some(StatementKind::Insert),
        "UPDATE" => Some(StatementKind::Update),
        "DELETE" => Some(StatementKind::Delete),
        _ => None,
    }
}

pub fn validate_query_type(
    sql: &str,
    allowed: &[StatementKind],
) -> Result<StatementKind, ValidationError> {
    let kind = statement_kind(sql).ok_or_else(|| {
        ValidationError::StatementType("Unable to determine query type".to_string())
    })?;
    if !allowed.contains(&kind) {
        let names = allowed
            .iter()
            .map(|k| format!("{:?}", k).to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ValidationError::StatementType(format!(
            "Query type '{:?}' not allowed. Allowed types: {}",
            kind, names
        )));
    }
    Ok(kind)
}

/// Safety, syntax and schema-reference gates over generated SQL.
pub struct QueryValidator {
    registry: Arc<SchemaRegistry>,
    engine: Arc<dyn QueryEngine>,
}

impl QueryValidator {
    pub fn new(registry: Arc<SchemaRegistry>, engine: Arc<dyn QueryEngine>) -> Self {
        Self { registry, engine }
    }

    /// Run the three stages in order; the first failure wins.
    pub async fn check(&self, sql: &str) -> Result<(), ValidationError> {
        check_safety(sql)?;
        self.check_syntax(sql).await?;
        check_schema_references(sql, &self.registry)?;
        log::info!("Query validation passed");
        Ok(())
    }

    pub async fn validate(&self, sql: &str) -> ValidationOutcome {
        self.check(sql).await.into()
    }

    /// Stage 2: ask the engine to compile the statement without running it.
    pub async fn check_syntax(&self, sql: &str) -> Result<(), ValidationError> {
        self.engine.validate_syntax(sql).await.map_err(|e| {
            let err = ValidationError::Syntax(format!("{:#}", e));
            log::warn!("{}", err);
            err
        })
    }

    pub fn estimate_complexity(&self, sql: &str) -> QueryMetrics {
        estimate_complexity(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{ColumnMeta, Row};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine that accepts everything and counts syntax checks.
    #[derive(Default)]
    struct CountingEngine {
        syntax_calls: AtomicUsize,
        reject_with: Option<String>,
    }

    #[async_trait]
    impl QueryEngine for CountingEngine {
        async fn execute(&self, _sql: &str) -> anyhow::Result<Vec<Row>> {
            Ok(vec![])
        }
        async fn validate_syntax(&self, _sql: &str) -> anyhow::Result<()> {
            self.syntax_calls.fetch_add(1, Ordering::SeqCst);
            match &self.reject_with {
                Some(msg) => anyhow::bail!("{}", msg),
                None => Ok(()),
            }
        }
        async fn describe_table(&self, _t: &str) -> anyhow::Result<Vec<ColumnMeta>> {
            Ok(vec![])
        }
        async fn list_tables(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn sample(&self, _t: &str, _l: u64) -> anyhow::Result<Vec<Row>> {
            Ok(vec![])
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::from_json_str(
                r#"{"tables": [
                    {"name": "customers", "columns": [{"name": "customer_id", "type": "INTEGER"}]},
                    {"name": "orders", "columns": [{"name": "order_id", "type": "INTEGER"}]}
                ]}"#,
            )
            .unwrap(),
        )
    }

    fn validator(engine: Arc<CountingEngine>) -> QueryValidator {
        QueryValidator::new(registry(), engine)
    }

    #[tokio::test]
    async fn test_clean_query_passes() {
        let engine = Arc::new(CountingEngine::default());
        let v = validator(engine.clone());
        let outcome = v.validate("SELECT COUNT(*) FROM customers").await;
        assert_eq!(
            outcome,
            ValidationOutcome {
                valid: true,
                error: None
            }
        );
        assert_eq!(engine.syntax_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deny_list_short_circuits_before_syntax() {
        for sql in [
            "DROP TABLE customers",
            "truncate orders",
            "Alter table orders add column x int",
            "CREATE TABLE t (id int)",
            "grant all on orders to bob",
            "REVOKE select ON orders FROM bob",
        ] {
            let engine = Arc::new(CountingEngine::default());
            let v = validator(engine.clone());
            let err = v.check(sql).await.unwrap_err();
            assert_eq!(err.stage(), ValidationStage::Safety, "{}", sql);
            assert_eq!(engine.syntax_calls.load(Ordering::SeqCst), 0, "{}", sql);
        }
    }

    #[test]
    fn test_delete_where_one_equals_one() {
        assert_eq!(
            check_safety("DELETE FROM orders WHERE 1 = 1"),
            Err(ValidationError::UnsafePattern("DELETE ... WHERE 1=1"))
        );
        assert!(check_safety("DELETE FROM orders WHERE order_id = 1").is_ok());
    }

    #[test]
    fn test_multiple_statements() {
        assert_eq!(
            check_safety("SELECT 1; SELECT 2"),
            Err(ValidationError::UnsafePattern("multiple statements"))
        );
        assert!(check_safety("SELECT 1;").is_ok());
        assert!(check_safety("SELECT 1;   \n").is_ok());
    }

    #[test]
    fn test_drop_reported_for_chained_statement() {
        let err = check_safety("SELECT * FROM orders; DROP TABLE customers").unwrap_err();
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn test_keywords_need_word_boundaries() {
        assert!(check_safety("SELECT created_at, dropped_flag FROM orders").is_ok());
    }

    #[tokio::test]
    async fn test_syntax_error_carries_engine_message() {
        let engine = Arc::new(CountingEngine {
            reject_with: Some("near \"SELEC\": syntax error".to_string()),
            ..Default::default()
        });
        let err = validator(engine).check("SELEC 1").await.unwrap_err();
        assert_eq!(err.stage(), ValidationStage::Syntax);
        assert!(err.to_string().contains("near \"SELEC\": syntax error"));
    }

    #[tokio::test]
    async fn test_unknown_table_lists_known_tables() {
        let engine = Arc::new(CountingEngine::default());
        let err = validator(engine)
            .check("SELECT * FROM products")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), ValidationStage::SchemaReference);
        assert_eq!(
            err.to_string(),
            "Table 'products' not found in schema. Available tables: customers, orders"
        );
    }

    #[tokio::test]
    async fn test_common_table_expression_passes() {
        let engine = Arc::new(CountingEngine::default());
        let outcome = validator(engine)
            .validate(
                "WITH big AS (SELECT customer_id FROM orders WHERE order_id > 10) \
                 SELECT COUNT(*) FROM customers JOIN big ON big.customer_id = customers.customer_id",
            )
            .await;
        assert!(outcome.valid, "{:?}", outcome.error);
    }

    #[test]
    fn test_unknown_table_inside_cte_body() {
        let err = check_schema_references(
            "WITH p AS (SELECT * FROM products) SELECT * FROM p",
            &registry(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Table 'products' not found in schema. Available tables: customers, orders"
        );
    }

    #[test]
    fn test_schema_reference_case_insensitive() {
        assert!(check_schema_references("SELECT * FROM CUSTOMERS JOIN Orders o ON 1", &registry()).is_ok());
    }

    #[test]
    fn test_schema_reference_skipped_when_unscannable() {
        assert!(check_schema_references("SELECT * FROM nowhere WHERE a = 'open", &registry()).is_ok());
    }

    #[test]
    fn test_statement_kind() {
        assert_eq!(statement_kind("  select 1"), Some(StatementKind::Select));
        assert_eq!(statement_kind("WITH x AS (SELECT 1) SELECT * FROM x"), Some(StatementKind::Select));
        assert_eq!(statement_kind("insert into t values (1)"), Some(StatementKind::Insert));
        assert_eq!(statement_kind("PRAGMA table_info(t)"), None);
        assert_eq!(statement_kind(""), None);
    }

    #[test]
    fn test_validate_query_type() {
        assert_eq!(
            validate_query_type("SELECT 1", &[StatementKind::Select]),
            Ok(StatementKind::Select)
        );
        let err = validate_query_type("UPDATE t SET a = 1", &[StatementKind::Select]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query type 'Update' not allowed. Allowed types: SELECT"
        );
        assert!(validate_query_type("EXPLAIN SELECT 1", &[StatementKind::Select]).is_err());
    }
}
