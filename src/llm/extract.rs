use once_cell::sync::Lazy;
use regex::Regex;

static SQL_FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```sql\s*(.*?)\s*```").unwrap());

static ANY_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").unwrap());

static LEADING_KEYWORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH|INSERT|UPDATE|DELETE|CREATE)\b").unwrap());

/// Marker the model uses to decline a question.
pub const UNANSWERABLE_SENTINEL: &str = "ERROR:";

/// Pull a SQL statement out of a free-form model response.
///
/// Tried in order: a ```sql fence, any fence, the first line that starts with
/// a statement keyword (plus following non-blank lines), then the whole
/// response. Never fails.
pub fn extract_sql(response: &str) -> String {
    if let Some(caps) = SQL_FENCE_REGEX.captures(response) {
        log::debug!("Extracted SQL from sql code block");
        return caps[1].trim().to_string();
    }

    if let Some(caps) = ANY_FENCE_REGEX.captures(response) {
        log::debug!("Extracted SQL from generic code block");
        return caps[1].trim().to_string();
    }

    let lines: Vec<&str> = response.lines().collect();
    if let Some(start) = lines
        .iter()
        .position(|line| LEADING_KEYWORD_REGEX.is_match(line.trim()))
    {
        let statement = lines[start..]
            .iter()
            .map(|line| line.trim())
            .take_while(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        log::debug!("Extracted SQL by keyword detection");
        return statement;
    }

    log::warn!("Could not extract SQL with patterns, returning cleaned response");
    response.trim().to_string()
}

/// Normalise an extracted statement: drop stray fences, collapse whitespace,
/// strip trailing semicolons.
pub fn clean_sql(sql: &str) -> String {
    let without_fences = sql.replace("```sql", "").replace("```", "");
    let collapsed = without_fences.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim_end().to_string()
}

/// The model's refusal message, if the response is one.
pub fn unanswerable_reason(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    trimmed
        .starts_with(UNANSWERABLE_SENTINEL)
        .then_some(trimmed)
}

/// Numbered or bulleted lines from a suggestion response, markers removed.
pub fn parse_suggestions(response: &str, limit: usize) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit() || c == '-')
        })
        .map(|line| {
            line.trim_start_matches(|c: char| c.is_ascii_digit() || ".-) ".contains(c))
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(limit)
        .collect()
}
