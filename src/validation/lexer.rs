//! Best-effort table extraction from SQL text.
//!
//! This is a pattern scan, not a parser: it looks for identifiers right after
//! `FROM` and `JOIN`. Names bound by a leading `WITH` clause are dropped.
//! Callers should treat the result as a hint and let the engine have the
//! final word.

use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z0-9_]+)").unwrap());

/// Words that can follow FROM/JOIN without being a table.
const NON_TABLE_KEYWORDS: &[&str] = &[
    "select", "where", "group", "order", "having", "limit", "offset",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedLiteral(usize),
}

/// Replace the body of every single-quoted literal with a blank so keyword
/// scans do not see words inside strings. `''` escapes are handled.
pub fn strip_string_literals(sql: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(sql.len());
    let mut open_at: Option<usize> = None;

    for (i, ch) in sql.char_indices() {
        match (open_at, ch) {
            (None, '\'') => {
                open_at = Some(i);
                out.push('\'');
            }
            (None, c) => out.push(c),
            (Some(_), '\'') => {
                // An escaped quote closes and immediately reopens.
                open_at = None;
                out.push('\'');
            }
            (Some(_), _) => {}
        }
    }

    match open_at {
        Some(start) => Err(LexError::UnterminatedLiteral(start)),
        None => Ok(out),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Consume `keyword` (case-insensitive, whole word) after leading whitespace.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let text = text.trim_start();
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && !rest.starts_with(is_ident_char) {
        Some(rest)
    } else {
        None
    }
}

fn take_identifier(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    let end = text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len());
    if end == 0 {
        None
    } else {
        Some(text.split_at(end))
    }
}

/// Skip a balanced parenthesised group at the start of `text`.
fn skip_group(text: &str) -> Option<&str> {
    let text = text.trim_start();
    if !text.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[i + 1..]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Names bound by a leading `WITH [RECURSIVE] name [(cols)] AS (...)` list.
/// Expects literals to be stripped already.
fn common_table_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Some(mut rest) = strip_keyword(text, "WITH") else {
        return names;
    };
    if let Some(after) = strip_keyword(rest, "RECURSIVE") {
        rest = after;
    }

    while let Some((name, after)) = take_identifier(rest) {
        rest = after;
        if rest.trim_start().starts_with('(') {
            match skip_group(rest) {
                Some(after) => rest = after,
                None => break,
            }
        }
        let Some(after) = strip_keyword(rest, "AS") else {
            break;
        };
        rest = after;
        if let Some(after) = strip_keyword(rest, "NOT") {
            rest = after;
        }
        if let Some(after) = strip_keyword(rest, "MATERIALIZED") {
            rest = after;
        }
        let Some(after) = skip_group(rest) else {
            break;
        };
        names.push(name.to_string());
        match after.trim_start().strip_prefix(',') {
            Some(next) => rest = next,
            None => break,
        }
    }

    names
}

/// Identifiers following FROM/JOIN, deduplicated case-insensitively in order of
/// first appearance. Common table expression names are not reported.
pub fn extract_table_names(sql: &str) -> Result<Vec<String>, LexError> {
    let text = strip_string_literals(sql)?;
    let ctes = common_table_names(&text);
    let mut tables: Vec<String> = Vec::new();

    for caps in TABLE_REF_REGEX.captures_iter(&text) {
        let name = &caps[1];
        let lower = name.to_lowercase();
        if NON_TABLE_KEYWORDS.contains(&lower.as_str()) {
            continue;
        }
        if name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if ctes.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            continue;
        }
        if tables.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            continue;
        }
        tables.push(name.to_string());
    }

    Ok(tables)
}
