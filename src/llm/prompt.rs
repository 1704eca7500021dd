//! Prompt text for SQL generation and the free-form helpers.
//!
//! Everything here is a pure function of its inputs so prompts can be
//! snapshot-compared in tests.

use serde::{Deserialize, Serialize};

use crate::db::registry::SchemaRegistry;

/// Knobs that shape the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    pub include_examples: bool,
    pub custom_instructions: Option<String>,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            include_examples: true,
            custom_instructions: None,
        }
    }
}

/// A composed prompt pair, ready for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

const ROLE: &str = "You are an expert SQL query generator. Your task is to convert natural language \
questions into valid SQLite SQL queries based on the provided database schema.";

const DIALECT_GUIDE: &str = "## SQLite Syntax Guidelines

SQLite is an embedded SQL database engine with some specific syntax features:

- Use LIMIT for row limiting, not TOP
- String concatenation: Use the || operator
- Date functions: date(), datetime(), strftime(), julianday(), with 'now' for the current time
- String matching: LIKE is case-insensitive for ASCII, GLOB is case-sensitive
- Aggregations: Standard functions (COUNT, SUM, AVG, MIN, MAX, GROUP_CONCAT)
- Window functions: ROW_NUMBER(), RANK(), DENSE_RANK(), etc.
- CTEs: Supported with WITH clause
- Subqueries: Fully supported
- CASE expressions: Standard SQL syntax
- Type casting: Use CAST(expr AS INTEGER), CAST(expr AS REAL) or CAST(expr AS TEXT)
";

const RULES: &str = "## Query Generation Rules

1. **Always return valid SQL**: The query must be executable in SQLite
2. **Use proper table/column names**: Exactly match the schema
3. **Handle JOINs intelligently**:
   - Use foreign key relationships from the schema
   - Choose appropriate join types (INNER, LEFT, CROSS)
   - Always specify join conditions
4. **Apply filters appropriately**: Use WHERE clauses for row filtering
5. **Use aggregations when needed**: GROUP BY for aggregated queries
6. **Sort results meaningfully**: Add ORDER BY when ordering makes sense
7. **Limit results reasonably**: Use LIMIT for queries that might return many rows
8. **Handle NULL values**: Consider NULL handling in comparisons
9. **Use table aliases**: For readability in multi-table queries
10. **Avoid SELECT ***: Specify columns when possible, unless all columns are needed
11. **Match names exactly**: Column and table names should match the schema exactly
12. **Use single quotes for strings**: SQLite uses single quotes for string literals
";

const EXAMPLES: &str = "## Examples

Example 1:
Question: \"How many customers are there?\"
SQL: SELECT COUNT(*) AS customer_count FROM customers;

Example 2:
Question: \"Show me the top 5 most expensive products\"
SQL: SELECT name, price FROM products ORDER BY price DESC LIMIT 5;

Example 3:
Question: \"What is the total revenue per customer?\"
SQL:
SELECT
    c.customer_id,
    c.name,
    SUM(o.total_amount) AS total_revenue
FROM customers c
LEFT JOIN orders o ON c.customer_id = o.customer_id
GROUP BY c.customer_id, c.name
ORDER BY total_revenue DESC;

Example 4:
Question: \"Which products have never been ordered?\"
SQL:
SELECT p.product_id, p.name
FROM products p
LEFT JOIN order_items oi ON p.product_id = oi.product_id
WHERE oi.product_id IS NULL;

Example 5:
Question: \"Show monthly sales for the last 6 months\"
SQL:
SELECT
    strftime('%Y-%m', order_date) AS month,
    SUM(total_amount) AS monthly_sales
FROM orders
WHERE order_date >= date('now', '-6 months')
GROUP BY strftime('%Y-%m', order_date)
ORDER BY month DESC;
";

const OUTPUT_FORMAT: &str = "## Output Format

Return ONLY the SQL query without any additional explanation or markdown formatting.
The query should be production-ready and executable as-is.

If the question cannot be answered with the available schema, respond with:
ERROR: [Brief explanation of why the query cannot be generated]
";

pub const EXPLAIN_SYSTEM_PROMPT: &str = "You are a SQL expert. Explain the following SQL query in simple, \
natural language. Break down what data it retrieves, how it filters \
and transforms the data, and what the result represents.";

pub fn build_system_prompt(registry: &SchemaRegistry, options: &PromptOptions) -> String {
    let mut sections: Vec<String> = vec![
        ROLE.to_string(),
        format!("\n{}", registry.describe()),
        DIALECT_GUIDE.to_string(),
        RULES.to_string(),
    ];

    if options.include_examples {
        sections.push(EXAMPLES.to_string());
    }

    if let Some(instructions) = options
        .custom_instructions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        sections.push(format!("\n## Additional Instructions\n{}", instructions));
    }

    sections.push(OUTPUT_FORMAT.to_string());
    sections.join("\n\n")
}

pub fn build_user_prompt(question: &str) -> String {
    format!("Generate a SQL query to answer this question:\n\n{}", question)
}

/// Retry prompt carrying the rejected statement and the validator's reason.
pub fn build_validation_prompt(question: &str, sql: &str, error: &str) -> String {
    format!(
        "The following SQL query has an error:

Question: {question}
SQL: {sql}
Error: {error}

Please provide a corrected SQL query that:
1. Fixes the error
2. Still answers the original question
3. Uses only tables and columns from the schema
4. Is valid SQLite syntax

Return only the corrected SQL query.
"
    )
}

pub fn build_clarification_prompt(question: &str, issue: &str, tables: &[String]) -> String {
    format!(
        "The following question is ambiguous or unclear:

Question: {question}

Issue: {issue}

Available tables: {}

Please suggest:
1. What information is needed to clarify this question
2. Possible interpretations of the question
3. Example rephrased questions that would be clearer
",
        tables.join(", ")
    )
}

pub fn build_explain_prompt(sql: &str) -> String {
    format!("Explain this SQL query:\n\n{}", sql)
}

pub fn build_suggest_system_prompt(registry: &SchemaRegistry, count: usize) -> String {
    format!(
        "You are a data analyst. Based on the following database schema, \
         suggest {} similar or related questions that could be \
         answered with this data.\n\n{}",
        count,
        registry.table_summary()
    )
}

pub fn build_suggest_user_prompt(question: &str) -> String {
    format!("Original question: {}\n\nSuggest related questions:", question)
}

/// Compose the first-attempt prompt pair for a question.
pub fn compose(registry: &SchemaRegistry, options: &PromptOptions, question: &str) -> GenerationRequest {
    GenerationRequest {
        system: build_system_prompt(registry, options),
        user: build_user_prompt(question),
    }
}

/// Compose the single regeneration prompt pair after a validation failure.
pub fn compose_fix(
    registry: &SchemaRegistry,
    options: &PromptOptions,
    question: &str,
    sql: &str,
    error: &str,
) -> GenerationRequest {
    GenerationRequest {
        system: build_system_prompt(registry, options),
        user: build_validation_prompt(question, sql, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_json_str(
            r#"{
                "database_name": "shop",
                "tables": [
                    {"name": "customers", "columns": [
                        {"name": "customer_id", "type": "INTEGER", "primary_key": true},
                        {"name": "name", "type": "TEXT"}
                    ]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_system_prompt_is_deterministic() {
        let reg = registry();
        let opts = PromptOptions::default();
        assert_eq!(build_system_prompt(&reg, &opts), build_system_prompt(&reg, &opts));
    }

    #[test]
    fn test_section_order() {
        let reg = registry();
        let opts = PromptOptions {
            include_examples: true,
            custom_instructions: Some("Prefer CTEs.".to_string()),
        };
        let prompt = build_system_prompt(&reg, &opts);

        let positions: Vec<usize> = [
            "You are an expert SQL query generator",
            "# Database Schema",
            "## SQLite Syntax Guidelines",
            "## Query Generation Rules",
            "## Examples",
            "## Additional Instructions",
            "## Output Format",
        ]
        .iter()
        .map(|marker| prompt.find(marker).unwrap())
        .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("Prefer CTEs."));
        assert!(prompt.contains("ERROR: [Brief explanation"));
    }

    #[test]
    fn test_schema_embedded_verbatim() {
        let reg = registry();
        let prompt = build_system_prompt(&reg, &PromptOptions::default());
        assert!(prompt.contains(&reg.describe()));
    }

    #[test]
    fn test_optional_sections_omitted() {
        let reg = registry();
        let opts = PromptOptions {
            include_examples: false,
            custom_instructions: Some("   ".to_string()),
        };
        let prompt = build_system_prompt(&reg, &opts);
        assert!(!prompt.contains("## Examples"));
        assert!(!prompt.contains("## Additional Instructions"));
        assert!(prompt.ends_with(OUTPUT_FORMAT));
    }

    #[test]
    fn test_twelve_rules() {
        for n in 1..=12 {
            assert!(RULES.contains(&format!("\n{}. **", n)));
        }
        assert!(!RULES.contains("\n13. "));
    }

    #[test]
    fn test_user_prompt() {
        assert_eq!(
            build_user_prompt("How many customers are there?"),
            "Generate a SQL query to answer this question:\n\nHow many customers are there?"
        );
    }

    #[test]
    fn test_validation_prompt_embeds_sql_and_error() {
        let prompt = build_validation_prompt(
            "How many orders?",
            "SELECT COUNT(*) FROM order",
            "Table 'order' not found in schema. Available tables: orders",
        );
        assert!(prompt.contains("Question: How many orders?"));
        assert!(prompt.contains("SQL: SELECT COUNT(*) FROM order"));
        assert!(prompt.contains("Error: Table 'order' not found"));
        assert!(prompt.contains("Return only the corrected SQL query."));
    }

    #[test]
    fn test_clarification_lists_tables() {
        let prompt = build_clarification_prompt(
            "best customers?",
            "'best' is undefined",
            &["customers".to_string(), "orders".to_string()],
        );
        assert!(prompt.contains("Available tables: customers, orders"));
    }

    #[test]
    fn test_compose_fix_reuses_system_prompt() {
        let reg = registry();
        let opts = PromptOptions::default();
        let first = compose(&reg, &opts, "q");
        let fix = compose_fix(&reg, &opts, "q", "SELECT 1", "bad");
        assert_eq!(first.system, fix.system);
        assert_ne!(first.user, fix.user);
    }
}
