//! Input validation for values that end up in SQL text.
//!
//! Table names, the period key and the exception-clause literals are spliced
//! into statements (the server-resident rule, the literal per-row inserts and
//! the reset statement), so they are checked before any run starts.
//!
//! # Security
//!
//! Input validation prevents:
//! - SQL injection via malicious table names
//! - Oversized keys that would not fit the sink column

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for table names (including an optional schema qualifier)
pub const MAX_TABLE_NAME_LENGTH: usize = 255;

/// Maximum length for a run-period key
pub const MAX_PERIOD_KEY_LENGTH: usize = 16;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),

    /// Input is a reserved word
    #[error("{field} cannot be a reserved word: {word}")]
    ReservedWord { field: &'static str, word: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a table name.
///
/// # Rules
///
/// - Must not be empty
/// - Must not exceed 255 characters
/// - One or two dot-separated parts (`table` or `schema.table`)
/// - Each part starts with an ASCII letter or underscore
/// - Each part contains only ASCII letters, digits and underscores
/// - No part may be a SQL reserved word
///
/// # Examples
///
/// ```
/// use coupon_pipeline::validation::input::validate_table_name;
///
/// assert!(validate_table_name("customer").is_ok());
/// assert!(validate_table_name("bench.bonus_coupon").is_ok());
/// assert!(validate_table_name("").is_err());
/// assert!(validate_table_name("coupon; DROP TABLE customer").is_err());
/// ```
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Empty("table name"));
    }

    if name.len() > MAX_TABLE_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "table name",
            max: MAX_TABLE_NAME_LENGTH,
            actual: name.len(),
        });
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(ValidationError::InvalidFormat(
            "table name",
            "at most one schema qualifier is allowed".to_string(),
        ));
    }

    for part in parts {
        let Some(first_char) = part.chars().next() else {
            return Err(ValidationError::InvalidFormat(
                "table name",
                "empty name segment".to_string(),
            ));
        };
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(ValidationError::InvalidFormat(
                "table name",
                "must start with a letter or underscore".to_string(),
            ));
        }

        for c in part.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(ValidationError::InvalidCharacters {
                    field: "table name",
                    reason: format!("invalid character: '{}'", c),
                });
            }
        }

        if is_sql_reserved_word(part) {
            return Err(ValidationError::ReservedWord {
                field: "table name",
                word: part.to_string(),
            });
        }
    }

    Ok(())
}

/// Validate a run-period key such as `202506`.
///
/// # Rules
///
/// - Must not be empty
/// - At most 16 characters
/// - ASCII letters, digits, hyphens and underscores only
pub fn validate_period_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Empty("period key"));
    }

    if key.len() > MAX_PERIOD_KEY_LENGTH {
        return Err(ValidationError::TooLong {
            field: "period key",
            max: MAX_PERIOD_KEY_LENGTH,
            actual: key.len(),
        });
    }

    if let Some(c) = key
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(ValidationError::InvalidCharacters {
            field: "period key",
            reason: format!("invalid character: '{}'", c),
        });
    }

    Ok(())
}

/// Quote a value as a SQL string literal, doubling embedded quotes.
///
/// ```
/// use coupon_pipeline::validation::input::quote_literal;
///
/// assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
/// ```
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Check if a word is a SQL reserved word.
///
/// This is a basic check covering common reserved words across SQL dialects.
fn is_sql_reserved_word(word: &str) -> bool {
    const RESERVED_WORDS: &[&str] = &[
        "select", "from", "where", "insert", "update", "delete", "create", "drop", "alter",
        "table", "index", "view", "grant", "revoke", "commit", "rollback", "begin", "end",
        "transaction", "primary", "foreign", "references", "constraint", "unique", "check",
        "default", "not", "null", "and", "or", "in", "between", "like", "is", "case", "when",
        "then", "else", "as", "on", "join", "group", "by", "having", "order", "limit",
        "offset", "union", "all", "distinct", "values", "set", "into", "user",
    ];

    let lower = word.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_names() {
        assert!(validate_table_name("customer").is_ok());
        assert!(validate_table_name("BONUS_COUPON").is_ok());
        assert!(validate_table_name("_staging").is_ok());
        assert!(validate_table_name("bench.customer").is_ok());
    }

    #[test]
    fn test_invalid_table_names() {
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1customer").is_err());
        assert!(validate_table_name("customer-archive").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name("bench.").is_err());
        assert!(validate_table_name("x; DROP TABLE y").is_err());
        assert!(matches!(
            validate_table_name("order"),
            Err(ValidationError::ReservedWord { .. })
        ));
    }

    #[test]
    fn test_table_name_too_long() {
        let long_name = "a".repeat(256);
        assert!(matches!(
            validate_table_name(&long_name),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_period_key() {
        assert!(validate_period_key("202506").is_ok());
        assert!(validate_period_key("2025-06").is_ok());
        assert!(validate_period_key("").is_err());
        assert!(validate_period_key("2025'06").is_err());
        assert!(validate_period_key(&"9".repeat(17)).is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("송파구"), "'송파구'");
    }
}
