//! Identifier Validation
//!
//! Every schema name, object name and parameter name passes through
//! [`validate`] before it is placed into generated SQL text. This is the only
//! defence for identifiers; parameter *values* never go through here and are
//! always bound.
//!
//! A valid identifier is non-empty, at most [`MAX_IDENTIFIER_LEN`] characters,
//! consists only of ASCII letters, digits and `_`, and does not start with a
//! digit.

use crate::error::{GateError, Result};

/// Longest identifier accepted (SQL Server `sysname` length)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate an identifier, returning it unchanged on success
///
/// The returned `&str` is the caller's signal that the string is safe for
/// direct interpolation into SQL text.
pub fn validate(identifier: &str) -> Result<&str> {
    if identifier.is_empty() {
        return Err(GateError::invalid_identifier("identifier cannot be empty"));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(GateError::invalid_identifier(format!(
            "identifier is {} characters long, the limit is {MAX_IDENTIFIER_LEN}",
            identifier.len()
        )));
    }

    if let Some(bad) = identifier.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(GateError::invalid_identifier(format!(
            "'{}' contains {bad:?}, only [A-Za-z0-9_] is allowed",
            identifier.escape_default()
        )));
    }

    if identifier.as_bytes()[0].is_ascii_digit() {
        return Err(GateError::invalid_identifier(format!(
            "'{identifier}' starts with a digit"
        )));
    }

    Ok(identifier)
}

/// Validate every name yielded by `names`, stopping at the first failure
pub fn validate_all<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    for name in names {
        validate(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_bare_identifiers() {
        for ok in ["databasesList", "pupy", "dbo", "_private", "a", "T_1", "x9"] {
            assert_eq!(validate(ok).unwrap(), ok);
        }
    }

    #[test]
    fn test_rejects_empty() {
        let err = validate("").unwrap_err();
        assert!(matches!(err, GateError::InvalidIdentifier(_)));
        assert!(err.message().contains("empty"));
    }

    #[test]
    fn test_rejects_leading_digit() {
        assert!(validate("1table").is_err());
        assert!(validate("9").is_err());
    }

    #[test]
    fn test_rejects_characters_outside_allowed_set() {
        for bad in [
            "a b",
            "a;b",
            "a'b",
            "a\"b",
            "a]b",
            "a[b",
            "a-b",
            "a.b",
            "a@b",
            "a--",
            "a/*",
            "naïve",
            "ｆｕｌｌ",
            "tab\there",
            "new\nline",
            "nul\0",
            "dbo.Orders; DROP TABLE x",
        ] {
            assert!(validate(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_length_boundary() {
        let at_limit = "a".repeat(MAX_IDENTIFIER_LEN);
        assert!(validate(&at_limit).is_ok());

        let over_limit = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        let err = validate(&over_limit).unwrap_err();
        assert!(err.message().contains("129"));
    }

    #[test]
    fn test_validate_all_stops_on_first_failure() {
        assert!(validate_all(["a", "b", "c"]).is_ok());
        let err = validate_all(["a", "b;", "1c"]).unwrap_err();
        assert!(err.message().contains("b;"));
    }
}
