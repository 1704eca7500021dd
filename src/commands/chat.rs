use super::SharedPipeline;
use crate::llm::extract::parse_suggestions;
use crate::llm::prompt::{
    build_explain_prompt, build_suggest_system_prompt, build_suggest_user_prompt,
    EXPLAIN_SYSTEM_PROMPT,
};

/// Ask the model to explain a statement in plain language.
pub async fn explain_sql(pipeline: &SharedPipeline, sql: &str) -> Result<String, String> {
    log::info!("Generating query explanation");
    let guard = pipeline.lock().await;
    guard
        .generator()
        .chat(EXPLAIN_SYSTEM_PROMPT, &build_explain_prompt(sql))
        .await
        .map_err(|e| e.to_string())
}

/// Related questions the schema could answer. Backend failures yield an
/// empty list.
pub async fn suggest_questions(
    pipeline: &SharedPipeline,
    question: &str,
    count: usize,
) -> Result<Vec<String>, String> {
    log::info!("Generating question suggestions");
    let guard = pipeline.lock().await;
    let system = build_suggest_system_prompt(guard.registry(), count);
    match guard
        .generator()
        .chat(&system, &build_suggest_user_prompt(question))
        .await
    {
        Ok(response) => Ok(parse_suggestions(&response, count)),
        Err(e) => {
            log::error!("Question suggestion failed: {}", e);
            Ok(Vec::new())
        }
    }
}
