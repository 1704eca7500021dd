use serde_json::Value;

use super::SharedPipeline;
use crate::pipeline::{QueryResult, RunOptions};

/// Answer a natural-language question. Failures are reported inside the
/// envelope, so this only errors if the session itself is unusable.
pub async fn ask(
    pipeline: &SharedPipeline,
    question: &str,
    options: RunOptions,
) -> Result<QueryResult, String> {
    let question = question.trim();
    if question.is_empty() {
        return Err("Question must not be empty".to_string());
    }
    let guard = pipeline.lock().await;
    Ok(guard.run_with(question, options).await)
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Plain-text rendering of an envelope: SQL, an aligned table, and the
/// complexity summary.
pub fn format_result(result: &QueryResult) -> String {
    let mut out = String::new();

    if let Some(sql) = &result.sql {
        out.push_str(&format!("SQL: {}\n", sql));
    }

    if !result.success {
        out.push_str(&format!(
            "Error: {}\n",
            result.error.as_deref().unwrap_or("unknown error")
        ));
        return out;
    }

    let rows = result.results.as_deref().unwrap_or_default();
    out.push('\n');

    if let Some(first) = rows.first() {
        let headers: Vec<&String> = first.keys().collect();
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                headers
                    .iter()
                    .map(|h| row.get(*h).map(render_cell).unwrap_or_default())
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(h.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |values: Vec<&str>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        out.push_str(&line(headers.iter().map(|h| h.as_str()).collect()));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for row in &cells {
            out.push_str(&line(row.iter().map(String::as_str).collect()));
            out.push('\n');
        }
        out.push('\n');
    }

    let count = result.row_count.unwrap_or(rows.len());
    out.push_str(&format!(
        "({} row{})",
        count,
        if count == 1 { "" } else { "s" }
    ));
    if let Some(metrics) = &result.metrics {
        out.push_str(&format!(
            " complexity: {} (score {})",
            metrics.complexity_level, metrics.complexity_score
        ));
    }
    out.push('\n');
    out
}
