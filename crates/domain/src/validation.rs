//! Field validators shared by entity and mutation schemas.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{HavenError, Result};

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

pub fn validate_email(email: &str) -> Result<()> {
    let valid = EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email.trim()));
    if valid {
        Ok(())
    } else {
        Err(HavenError::InvalidPayload(format!("invalid email address: {email}")))
    }
}

pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HavenError::InvalidPayload(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Canonical form used for credential lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(validate_email("learner@example.org").is_ok());
        assert!(validate_email(" learner@example.org ").is_ok());
        assert!(validate_email("learner@").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn non_empty_check() {
        assert!(require_non_empty("title", "x").is_ok());
        assert!(require_non_empty("title", "   ").is_err());
    }
}
