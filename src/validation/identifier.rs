use std::fmt;

/// Errors from identifier validation.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierError {
    Empty,
    TooLong { max: usize, actual: usize },
    NullBytes,
    Invalid(String),
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierError::Empty => write!(f, "Identifier must not be empty"),
            IdentifierError::TooLong { max, actual } => {
                write!(f, "Identifier length {} exceeds maximum of {}", actual, max)
            }
            IdentifierError::NullBytes => write!(f, "Identifier contains null bytes"),
            IdentifierError::Invalid(reason) => write!(f, "Invalid SQL identifier: {}", reason),
        }
    }
}

impl std::error::Error for IdentifierError {}

const MAX_IDENTIFIER_LEN: usize = 128;

/// Keywords that are never accepted as a bare table name.
const RESERVED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "EXEC", "EXECUTE",
    "UNION", "SELECT", "TRUNCATE", "GRANT", "REVOKE",
];

/// Validate that a string is safe to interpolate as a table name.
///
/// Valid identifiers start with a letter or underscore, contain only ASCII
/// letters, digits and underscores, are not reserved keywords, and are at most
/// 128 characters long.
pub fn validate_identifier(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong {
            max: MAX_IDENTIFIER_LEN,
            actual: name.len(),
        });
    }

    if name.contains('\0') {
        return Err(IdentifierError::NullBytes);
    }

    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        return Err(IdentifierError::Invalid(
            "must start with a letter or underscore".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IdentifierError::Invalid(
            "must contain only letters, digits, and underscores".to_string(),
        ));
    }

    let upper = name.to_uppercase();
    if RESERVED_KEYWORDS.contains(&upper.as_str()) {
        return Err(IdentifierError::Invalid(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}
