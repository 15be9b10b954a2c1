//! Subdomain validation
//!
//! Pure function layer deciding whether a requested tunnel name is
//! syntactically legal and not reserved. Rules are applied in order and
//! the first failure wins; the same input always yields the same verdict.

mod reserved;

pub use reserved::{is_reserved, RESERVED_SUBDOMAINS};

use thiserror::Error;

/// Why a subdomain was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubdomainError {
    #[error("subdomain must be at least 3 characters long")]
    TooShort,

    #[error("subdomain cannot exceed 63 characters")]
    TooLong,

    #[error("subdomain '{0}' is reserved for system use")]
    Reserved(String),

    #[error(
        "subdomain must contain only lowercase letters, numbers, and hyphens, \
         and cannot start or end with a hyphen"
    )]
    InvalidFormat,

    #[error("subdomain cannot contain consecutive hyphens")]
    ConsecutiveHyphens,
}

/// A validated, normalized (lowercased and trimmed) subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subdomain(String);

impl Subdomain {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Subdomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a requested subdomain, returning the normalized form.
///
/// Rules, first failure wins:
/// 1. length 3-63 after lowercasing and trimming (DNS label limits)
/// 2. not in the reserved set (case-insensitive)
/// 3. `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$`
/// 4. no consecutive hyphens
pub fn validate(name: &str) -> Result<Subdomain, SubdomainError> {
    let normalized = name.trim().to_lowercase();

    // Counted in characters, not bytes: a short multi-byte name must
    // reach the format check rather than read as over-length
    let char_count = normalized.chars().count();
    if char_count < 3 {
        return Err(SubdomainError::TooShort);
    }
    if char_count > 63 {
        return Err(SubdomainError::TooLong);
    }

    if is_reserved(&normalized) {
        return Err(SubdomainError::Reserved(normalized));
    }

    if !matches_label_pattern(&normalized) {
        return Err(SubdomainError::InvalidFormat);
    }

    if normalized.contains("--") {
        return Err(SubdomainError::ConsecutiveHyphens);
    }

    Ok(Subdomain(normalized))
}

/// `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$` without a regex dependency
fn matches_label_pattern(s: &str) -> bool {
    let bytes = s.as_bytes();

    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match bytes {
        [] => false,
        [only] => is_alnum(*only),
        [first, middle @ .., last] => {
            is_alnum(*first)
                && is_alnum(*last)
                && middle.iter().all(|&b| is_alnum(b) || b == b'-')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_subdomains() {
        for name in ["myapp", "my-app", "abc", "a1b2c3", "app-2-prod", "x1z"] {
            let result = validate(name);
            assert!(result.is_ok(), "{} should be valid: {:?}", name, result);
        }
    }

    #[test]
    fn test_too_short() {
        assert_eq!(validate(""), Err(SubdomainError::TooShort));
        assert_eq!(validate("ab"), Err(SubdomainError::TooShort));
        assert_eq!(validate("  a  "), Err(SubdomainError::TooShort));
    }

    #[test]
    fn test_too_long() {
        let name = "a".repeat(64);
        assert_eq!(validate(&name), Err(SubdomainError::TooLong));

        let name = "a".repeat(63);
        assert!(validate(&name).is_ok());
    }

    #[test]
    fn test_reserved_names_rejected() {
        for name in ["admin", "api", "www", "mail", "dashboard", "tunnel"] {
            assert_eq!(
                validate(name),
                Err(SubdomainError::Reserved(name.to_string())),
                "{} should be reserved",
                name
            );
        }
    }

    #[test]
    fn test_reserved_check_is_case_insensitive() {
        assert_eq!(
            validate("ADMIN"),
            Err(SubdomainError::Reserved("admin".to_string()))
        );
        assert_eq!(
            validate("ApI"),
            Err(SubdomainError::Reserved("api".to_string()))
        );
    }

    #[test]
    fn test_edge_hyphens_rejected() {
        assert_eq!(validate("-abc"), Err(SubdomainError::InvalidFormat));
        assert_eq!(validate("abc-"), Err(SubdomainError::InvalidFormat));
    }

    #[test]
    fn test_consecutive_hyphens_rejected() {
        assert_eq!(validate("my--app"), Err(SubdomainError::ConsecutiveHyphens));
    }

    #[test]
    fn test_invalid_characters_rejected() {
        assert_eq!(validate("my_app"), Err(SubdomainError::InvalidFormat));
        assert_eq!(validate("my.app"), Err(SubdomainError::InvalidFormat));
        assert_eq!(validate("my app"), Err(SubdomainError::InvalidFormat));
    }

    #[test]
    fn test_multibyte_name_rejected_for_format_not_length() {
        // Multi-byte names are a format violation, not over-length
        assert_eq!(validate("café1"), Err(SubdomainError::InvalidFormat));
        assert_eq!(validate("日本語の名前"), Err(SubdomainError::InvalidFormat));

        // 40 characters but 80 bytes: still judged on characters
        let wide = "é".repeat(40);
        assert_eq!(validate(&wide), Err(SubdomainError::InvalidFormat));
    }

    #[test]
    fn test_uppercase_is_normalized() {
        let sub = validate("MyApp").unwrap();
        assert_eq!(sub.as_str(), "myapp");
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let sub = validate("  myapp  ").unwrap();
        assert_eq!(sub.as_str(), "myapp");
    }

    #[test]
    fn test_determinism() {
        for _ in 0..3 {
            assert_eq!(validate("my--app"), Err(SubdomainError::ConsecutiveHyphens));
            assert!(validate("steady-name").is_ok());
        }
    }
}
