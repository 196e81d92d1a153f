//! Validation for document paths and capture names
//!
//! Concrete document paths address exactly one document (or collection) in
//! the store. They are normalized to a single canonical form so that the
//! lookup cache and the store agree on keys:
//!
//! - leading and trailing `/` are stripped, then a single leading `/` is added
//! - empty segments, `.` and `..` are rejected (no traversal tricks)
//! - `{`, `}` and `*` are rejected (those belong to patterns, not requests)

use crate::error::{GateError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// A validated, concrete document path such as `/chats/C1/messages/M9`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    /// Parse and normalize a concrete path
    ///
    /// # Examples
    ///
    /// ```
    /// use docgate::DocumentPath;
    ///
    /// let path = DocumentPath::parse("chats/C1/").unwrap();
    /// assert_eq!(path.to_string(), "/chats/C1");
    ///
    /// assert!(DocumentPath::parse("/chats/../users/42").is_err());
    /// assert!(DocumentPath::parse("/chats/{chat_id}").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(invalid(path, "path is empty"));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "" => return Err(invalid(path, "empty segment")),
                "." | ".." => return Err(invalid(path, "relative segment")),
                s if s.contains(['{', '}', '*']) => {
                    return Err(invalid(path, "wildcard or capture in concrete path"))
                }
                s => segments.push(s.to_string()),
            }
        }

        Ok(DocumentPath { segments })
    }

    /// Path segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment (document id)
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Canonical string form of a concrete path, used as store and cache key
pub fn normalize_path(path: &str) -> Result<String> {
    Ok(DocumentPath::parse(path)?.to_string())
}

/// Validate a capture variable name (`chat_id`, `document`, ...)
pub fn validate_capture_name(name: &str, pattern: &str) -> Result<()> {
    if !capture_name_regex()?.is_match(name) {
        return Err(GateError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("capture name '{}' must be an identifier", name),
        });
    }
    Ok(())
}

fn capture_name_regex() -> Result<&'static Regex> {
    static CAPTURE_NAME: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = CAPTURE_NAME.get() {
        return Ok(re);
    }
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")?;
    Ok(CAPTURE_NAME.get_or_init(|| re))
}

fn invalid(path: &str, reason: &str) -> GateError {
    GateError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
