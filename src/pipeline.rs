//! Question in, rows out: compose, generate, validate (with a single
//! regeneration on failure), execute.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::connectors::QueryEngine;
use crate::db::registry::SchemaRegistry;
use crate::db::schema::Row;
use crate::llm::backend::{CancellationToken, GenerationBackend, RetryPolicy, SqlGenerator};
use crate::llm::prompt::{self, PromptOptions};
use crate::validation::{QueryMetrics, QueryValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Composing,
    Generating,
    Validating,
    Retrying,
    Revalidating,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Composing => "composing",
            PipelineState::Generating => "generating",
            PipelineState::Validating => "validating",
            PipelineState::Retrying => "retrying",
            PipelineState::Revalidating => "revalidating",
            PipelineState::Executing => "executing",
            PipelineState::Succeeded => "succeeded",
            PipelineState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Immutable settings for one pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub prompt: PromptOptions,
    pub retry: RetryPolicy,
    pub request_timeout: Option<Duration>,
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub validate: bool,
    pub retry_on_error: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            validate: true,
            retry_on_error: true,
        }
    }
}

/// Uniform outcome of a pipeline run. Absent fields serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub question: String,
    pub sql: Option<String>,
    pub results: Option<Vec<Row>>,
    pub row_count: Option<usize>,
    pub error: Option<String>,
    pub metrics: Option<QueryMetrics>,
}

impl QueryResult {
    fn failure(question: &str, sql: Option<String>, error: String) -> Self {
        Self {
            success: false,
            question: question.to_string(),
            sql,
            results: None,
            row_count: None,
            error: Some(error),
            metrics: None,
        }
    }
}

/// Walks the state machine for one run and logs each step.
struct Transitions {
    current: PipelineState,
}

impl Transitions {
    fn start() -> Self {
        log::debug!("pipeline state: {}", PipelineState::Composing);
        Self {
            current: PipelineState::Composing,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        log::debug!("pipeline state: {} -> {}", self.current, next);
        self.current = next;
    }

    fn fail(&mut self, question: &str, sql: Option<String>, error: String) -> QueryResult {
        self.advance(PipelineState::Failed);
        log::error!("Query failed: {}", error);
        QueryResult::failure(question, sql, error)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<SchemaRegistry>,
    engine: Arc<dyn QueryEngine>,
    generator: SqlGenerator,
    validator: QueryValidator,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<SchemaRegistry>,
        backend: Arc<dyn GenerationBackend>,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        let generator = SqlGenerator::new(backend, config.retry.clone())
            .with_timeout(config.request_timeout);
        let validator = QueryValidator::new(registry.clone(), engine.clone());
        Self {
            config,
            registry,
            engine,
            generator,
            validator,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn QueryEngine> {
        &self.engine
    }

    pub fn generator(&self) -> &SqlGenerator {
        &self.generator
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Token that aborts in-flight generation for this pipeline.
    pub fn cancel_token(&self) -> CancellationToken {
        self.generator.cancel_token().clone()
    }

    /// Swap in a reloaded schema. Later runs validate and prompt against it.
    pub fn set_schema(&mut self, registry: SchemaRegistry) {
        log::info!(
            "Schema replaced: {} ({} tables)",
            registry.schema().database_name,
            registry.schema().tables.len()
        );
        self.registry = Arc::new(registry);
        self.validator = QueryValidator::new(self.registry.clone(), self.engine.clone());
    }

    pub async fn run(&self, question: &str) -> QueryResult {
        self.run_with(question, RunOptions::default()).await
    }

    pub async fn run_with(&self, question: &str, options: RunOptions) -> QueryResult {
        log::info!("Processing question: {}", question);
        let mut states = Transitions::start();

        let request = prompt::compose(&self.registry, &self.config.prompt, question);
        log::debug!("System prompt length: {} chars", request.system.len());

        states.advance(PipelineState::Generating);
        let mut sql = match self.generator.generate(&request.system, &request.user).await {
            Ok(sql) => sql,
            Err(e) => return states.fail(question, None, e.to_string()),
        };

        if options.validate {
            states.advance(PipelineState::Validating);
            if let Err(first) = self.validator.check(&sql).await {
                log::warn!("Generated SQL failed validation: {}", first);

                if !options.retry_on_error {
                    return states.fail(
                        question,
                        Some(sql),
                        format!("SQL validation failed: {}", first),
                    );
                }

                states.advance(PipelineState::Retrying);
                let fix = prompt::compose_fix(
                    &self.registry,
                    &self.config.prompt,
                    question,
                    &sql,
                    &first.to_string(),
                );
                sql = match self.generator.generate(&fix.system, &fix.user).await {
                    Ok(corrected) => corrected,
                    Err(e) => return states.fail(question, Some(sql), e.to_string()),
                };

                states.advance(PipelineState::Revalidating);
                if let Err(second) = self.validator.check(&sql).await {
                    return states.fail(
                        question,
                        Some(sql),
                        format!("SQL validation failed after retry: {}", second),
                    );
                }
            }
        }

        states.advance(PipelineState::Executing);
        let rows = match self.engine.execute(&sql).await {
            Ok(rows) => rows,
            Err(e) => return states.fail(question, Some(sql), format!("{:#}", e)),
        };

        let metrics = self.validator.estimate_complexity(&sql);
        states.advance(PipelineState::Succeeded);
        log::info!(
            "Query returned {} rows (complexity {})",
            rows.len(),
            metrics.complexity_level
        );

        QueryResult {
            success: true,
            question: question.to_string(),
            row_count: Some(rows.len()),
            results: Some(rows),
            sql: Some(sql),
            error: None,
            metrics: Some(metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_envelope_serializes_nulls() {
        let result = QueryResult::failure("q", None, "boom".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["sql"].is_null());
        assert!(json["results"].is_null());
        assert!(json["row_count"].is_null());
        assert!(json["metrics"].is_null());
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_envelope_field_order() {
        let result = QueryResult::failure("q", Some("SELECT 1".into()), "e".into());
        let json = serde_json::to_string(&result).unwrap();
        let keys = ["success", "question", "sql", "results", "row_count", "error", "metrics"];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| json.find(&format!("\"{}\"", k)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_run_options_default() {
        let opts = RunOptions::default();
        assert!(opts.validate && opts.retry_on_error);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Revalidating.to_string(), "revalidating");
    }
}
