//! Dot-separated property paths.

use std::fmt;

use crate::error::{ReferenceError, Result};

/// A property path such as `user.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parse a dot-separated path, rejecting empty paths and segments.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(ReferenceError::EmptyPath);
        }
        let segments: Vec<String> = s.split('.').map(String::from).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ReferenceError::EmptySegment {
                path: s.to_string(),
            });
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment; a parsed path always has one.
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let path = Path::parse("user.name").unwrap();
        assert_eq!(path.segments(), &["user".to_string(), "name".to_string()]);
        assert_eq!(path.head(), "user");
        assert_eq!(path.to_string(), "user.name");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(Path::parse(""), Err(ReferenceError::EmptyPath));
        assert!(matches!(
            Path::parse("a..b"),
            Err(ReferenceError::EmptySegment { path }) if path == "a..b"
        ));
        assert!(Path::parse(".a").is_err());
    }
}
