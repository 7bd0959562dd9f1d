//! Identifier and literal hygiene for naive SQL construction
//!
//! The schema operations build DDL by string concatenation, so the only
//! defense is strict identifier validation plus backtick quoting. Column
//! type strings are trusted from the caller apart from a metacharacter
//! screen.

use crate::error::{Error, Result};

/// Validate a SQL identifier (table, column, index names).
///
/// - Must not be empty
/// - Maximum 64 characters (the server-side identifier limit)
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumerics and underscores
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }
    if name.len() > 64 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 64)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "invalid SQL identifier '{name}': must start with a letter or underscore"
            )));
        }
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "invalid SQL identifier '{name}': contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// Validate and backtick-quote an identifier for interpolation into DDL
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{name}`"))
}

/// Validate a column type string for safe interpolation into DDL.
///
/// Allows the characters legitimate type specifications use (letters,
/// digits, underscores, parentheses, commas, spaces, single quotes for
/// ENUM value lists, periods). Rejects semicolons, backticks and other
/// metacharacters that could escape the DDL context.
pub fn validate_type_name(type_name: &str) -> Result<()> {
    if type_name.is_empty() {
        return Err(Error::config("column type cannot be empty"));
    }
    for c in type_name.chars() {
        let ok = c.is_ascii_alphanumeric()
            || matches!(c, '_' | '(' | ')' | ',' | ' ' | '\'' | '.');
        if !ok {
            return Err(Error::config(format!(
                "invalid column type '{type_name}': contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// Escape a string for a single-quoted SQL literal context (`'` → `''`)
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table_123").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("123abc").is_err());
        assert!(validate_identifier("x; DROP TABLE users--").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users").unwrap(), "`users`");
        assert!(quote_identifier("a`b").is_err());
    }

    #[test]
    fn test_type_names() {
        assert!(validate_type_name("INT").is_ok());
        assert!(validate_type_name("VARCHAR(255)").is_ok());
        assert!(validate_type_name("DECIMAL(10,2)").is_ok());
        assert!(validate_type_name("ENUM('a','b')").is_ok());
        assert!(validate_type_name("INT UNSIGNED").is_ok());

        assert!(validate_type_name("").is_err());
        assert!(validate_type_name("INT; DROP TABLE t").is_err());
        assert!(validate_type_name("INT`").is_err());
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("users"), "users");
        assert_eq!(escape_string_literal("don't"), "don''t");
    }
}
