use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::lexer::{extract_table_names, strip_string_literals};

static JOIN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").unwrap());
static SUBQUERY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(\s*SELECT\b").unwrap());
static AGGREGATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\b").unwrap());
static GROUP_BY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());
static ORDER_BY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").unwrap());
static LIMIT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

impl ComplexityLevel {
    pub fn from_score(score: u32) -> Self {
        if score < 3 {
            ComplexityLevel::Low
        } else if score < 7 {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::High
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityLevel::Low => write!(f, "low"),
            ComplexityLevel::Medium => write!(f, "medium"),
            ComplexityLevel::High => write!(f, "high"),
        }
    }
}

/// Textual cost signals for a statement. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub num_joins: u32,
    pub num_subqueries: u32,
    pub has_aggregation: bool,
    pub has_group_by: bool,
    pub has_order_by: bool,
    pub has_limit: bool,
    pub num_tables: u32,
    pub complexity_score: u32,
    pub complexity_level: ComplexityLevel,
}

/// Score = 2·joins + 3·subqueries + aggregation + group by + tables.
pub fn estimate_complexity(sql: &str) -> QueryMetrics {
    let text = strip_string_literals(sql).unwrap_or_else(|_| sql.to_string());

    let num_joins = JOIN_REGEX.find_iter(&text).count() as u32;
    let num_subqueries = SUBQUERY_REGEX.find_iter(&text).count() as u32;
    let has_aggregation = AGGREGATE_REGEX.is_match(&text);
    let has_group_by = GROUP_BY_REGEX.is_match(&text);
    let has_order_by = ORDER_BY_REGEX.is_match(&text);
    let has_limit = LIMIT_REGEX.is_match(&text);
    let num_tables = extract_table_names(sql).map(|t| t.len() as u32).unwrap_or(0);

    let complexity_score = num_joins * 2
        + num_subqueries * 3
        + u32::from(has_aggregation)
        + u32::from(has_group_by)
        + num_tables;

    QueryMetrics {
        num_joins,
        num_subqueries,
        has_aggregation,
        has_group_by,
        has_order_by,
        has_limit,
        num_tables,
        complexity_score,
        complexity_level: ComplexityLevel::from_score(complexity_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_count() {
        let m = estimate_complexity("SELECT COUNT(*) FROM customers");
        assert_eq!(m.num_joins, 0);
        assert_eq!(m.num_tables, 1);
        assert!(m.has_aggregation);
        assert_eq!(m.complexity_score, 2);
        assert_eq!(m.complexity_level, ComplexityLevel::Low);
    }

    #[test]
    fn test_join_adds_two() {
        let base = estimate_complexity(
            "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.customer_id",
        );
        let more = estimate_complexity(
            "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.customer_id \
             JOIN customers c2 ON o.customer_id = c2.customer_id",
        );
        assert_eq!(more.num_joins, base.num_joins + 1);
        assert_eq!(more.complexity_score, base.complexity_score + 2);
    }

    #[test]
    fn test_subquery_adds_three() {
        let base = estimate_complexity("SELECT * FROM orders WHERE total_amount > 10");
        let more =
            estimate_complexity("SELECT * FROM orders WHERE total_amount > (SELECT 10)");
        assert_eq!(more.num_subqueries, 1);
        assert_eq!(more.complexity_score, base.complexity_score + 3);
    }

    #[test]
    fn test_flags() {
        let m = estimate_complexity(
            "SELECT status, SUM(total_amount) FROM orders GROUP BY status ORDER BY 2 DESC LIMIT 5",
        );
        assert!(m.has_aggregation && m.has_group_by && m.has_order_by && m.has_limit);
        assert_eq!(m.complexity_score, 3);
        assert_eq!(m.complexity_level, ComplexityLevel::Medium);
    }

    #[test]
    fn test_high_level() {
        let m = estimate_complexity(
            "SELECT c.name, COUNT(*) FROM customers c \
             JOIN orders o ON o.customer_id = c.customer_id \
             JOIN order_items oi ON oi.order_id = o.order_id \
             GROUP BY c.name",
        );
        // 2 joins (4) + aggregation + group by + 3 tables
        assert_eq!(m.complexity_score, 9);
        assert_eq!(m.complexity_level, ComplexityLevel::High);
    }

    #[test]
    fn test_keywords_inside_literals_ignored() {
        let m = estimate_complexity("SELECT * FROM notes WHERE body = 'join the count'");
        assert_eq!(m.num_joins, 0);
        assert!(!m.has_aggregation);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let json = serde_json::to_string(&ComplexityLevel::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
