//! Validated chat usernames.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Default maximum username length, in characters.
pub const DEFAULT_MAX_USERNAME_CHARS: usize = 12;

/// A chat username announced during the connection handshake.
///
/// Construct with [`Username::parse`] to enforce the handshake rules;
/// values deserialized off the wire are trusted as-is since only the
/// broker produces them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Validates and normalizes a raw username.
    ///
    /// Surrounding whitespace is trimmed. The result must be non-empty,
    /// at most `max_chars` characters long, and free of control characters.
    pub fn parse(raw: &str, max_chars: usize) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyUsername);
        }

        let length = trimmed.chars().count();
        if length > max_chars {
            return Err(DomainError::UsernameTooLong {
                length,
                max: max_chars,
            });
        }

        if let Some(ch) = trimmed.chars().find(|c| c.is_control()) {
            return Err(DomainError::UsernameControlChar(ch));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Creates a username without validation.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters (not bytes) in the name.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let name = Username::parse("  alice \n", DEFAULT_MAX_USERNAME_CHARS).unwrap();
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(
            Username::parse("   ", DEFAULT_MAX_USERNAME_CHARS),
            Err(DomainError::EmptyUsername)
        );
    }

    #[test]
    fn test_parse_counts_chars_not_bytes() {
        // 12 multi-byte characters fit; 13 do not.
        let twelve = "é".repeat(12);
        assert!(Username::parse(&twelve, 12).is_ok());

        let thirteen = "é".repeat(13);
        assert_eq!(
            Username::parse(&thirteen, 12),
            Err(DomainError::UsernameTooLong { length: 13, max: 12 })
        );
    }

    #[test]
    fn test_parse_rejects_control_chars() {
        assert_eq!(
            Username::parse("al\u{7}ice", 12),
            Err(DomainError::UsernameControlChar('\u{7}'))
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let name = Username::new_unchecked("bob");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"bob\"");
    }
}
