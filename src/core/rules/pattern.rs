//! Path patterns for rule scopes
//!
//! A pattern is a sequence of segments:
//! - `chats` - literal, matches exactly that segment
//! - `{chat_id}` - single-level capture, binds one segment
//! - `{document=**}` - recursive capture, binds zero or more remaining
//!   segments; only allowed as the final segment
//!
//! Scopes nest, so a scope pattern only describes the part of the path below
//! its parent (`/messages/{document=**}` inside `/chats/{chat_id}`).

use crate::core::validation::{normalize_path, validate_capture_name};
use crate::error::{GateError, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Capture name to concrete value, accumulated along a match
pub type Captures = BTreeMap<String, String>;

/// One segment of a path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture(String),
    Recursive(String),
}

impl Segment {
    fn parse(raw: &str, pattern: &str) -> Result<Segment> {
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            return match inner.strip_suffix("=**") {
                Some(name) => {
                    validate_capture_name(name, pattern)?;
                    Ok(Segment::Recursive(name.to_string()))
                }
                None => {
                    validate_capture_name(inner, pattern)?;
                    Ok(Segment::Capture(inner.to_string()))
                }
            };
        }

        if raw.contains(['{', '}', '*']) {
            return Err(GateError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("malformed segment '{}'", raw),
            });
        }

        Ok(Segment::Literal(raw.to_string()))
    }

    /// Capture name, if this segment binds one
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Capture(name) | Segment::Recursive(name) => Some(name),
        }
    }

    /// Match priority: literals before captures before recursive captures
    pub fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Capture(_) => 1,
            Segment::Recursive(_) => 2,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Capture(name) => write!(f, "{{{}}}", name),
            Segment::Recursive(name) => write!(f, "{{{}=**}}", name),
        }
    }
}

/// Compiled path pattern of one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern, rejecting malformed ones
    ///
    /// # Examples
    /// ```
    /// use docgate::PathPattern;
    ///
    /// assert!(PathPattern::parse("/chats/{chat_id}").is_ok());
    /// assert!(PathPattern::parse("/messages/{document=**}").is_ok());
    /// assert!(PathPattern::parse("/{rest=**}/tail").is_err());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(GateError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        let raw: Vec<&str> = trimmed.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (idx, part) in raw.iter().enumerate() {
            if part.is_empty() {
                return Err(GateError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "empty segment".to_string(),
                });
            }

            let segment = Segment::parse(part, pattern)?;
            if matches!(segment, Segment::Recursive(_)) && idx + 1 != raw.len() {
                return Err(GateError::RecursiveNotTerminal(pattern.to_string()));
            }
            if let Some(name) = segment.name() {
                if segments.iter().any(|s: &Segment| s.name() == Some(name)) {
                    return Err(GateError::DuplicateCapture {
                        name: name.to_string(),
                        scope: pattern.to_string(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(PathPattern { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the pattern ends in a recursive capture
    pub fn is_recursive(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Recursive(_)))
    }

    /// Capture names bound by this pattern
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(Segment::name)
    }

    /// Priority key among siblings: per-segment ranks, compared lexicographically
    pub fn specificity(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }

    /// Match this pattern against the front of `path`
    ///
    /// Returns the number of path segments consumed and adds the bindings to
    /// `captures`. On failure `captures` is left untouched.
    pub fn match_prefix(&self, path: &[String], captures: &mut Captures) -> Option<usize> {
        let mut bound: Vec<(&str, String)> = Vec::new();
        let mut consumed = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if path.get(consumed)? != lit {
                        return None;
                    }
                    consumed += 1;
                }
                Segment::Capture(name) => {
                    bound.push((name.as_str(), path.get(consumed)?.clone()));
                    consumed += 1;
                }
                Segment::Recursive(name) => {
                    bound.push((name.as_str(), path[consumed..].join("/")));
                    consumed = path.len();
                }
            }
        }

        for (name, value) in bound {
            captures.insert(name.to_string(), value);
        }
        Some(consumed)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Lookup path with `{capture}` placeholders, e.g. `/chats/{chat_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Var(String),
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let pattern = PathPattern::parse(template)?;
        let mut parts = Vec::with_capacity(pattern.segments.len());
        for segment in pattern.segments {
            match segment {
                Segment::Literal(lit) => parts.push(TemplatePart::Literal(lit)),
                Segment::Capture(name) => parts.push(TemplatePart::Var(name)),
                Segment::Recursive(_) => {
                    return Err(GateError::InvalidPattern {
                        pattern: template.to_string(),
                        reason: "lookup paths cannot contain recursive captures".to_string(),
                    })
                }
            }
        }
        Ok(PathTemplate { parts })
    }

    /// Capture names the template needs
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Var(name) => Some(name.as_str()),
            TemplatePart::Literal(_) => None,
        })
    }

    /// Substitute captures and normalize. Errors name the first missing capture
    /// or report a path that does not normalize.
    pub fn render(&self, captures: &Captures) -> std::result::Result<String, String> {
        let mut rendered = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match part {
                TemplatePart::Literal(lit) => rendered.push(lit.as_str()),
                TemplatePart::Var(name) => match captures.get(name) {
                    Some(value) => rendered.push(value.as_str()),
                    None => return Err(name.clone()),
                },
            }
        }
        normalize_path(&rendered.join("/")).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Vec<String> {
        p.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
    }

    fn matches(pattern: &str, p: &str) -> Option<(usize, Captures)> {
        let mut captures = Captures::new();
        PathPattern::parse(pattern)
            .unwrap()
            .match_prefix(&path(p), &mut captures)
            .map(|n| (n, captures))
    }

    #[test]
    fn test_literal_match() {
        assert_eq!(matches("/chats", "/chats/C1").map(|m| m.0), Some(1));
        assert!(matches("/chats", "/users/42").is_none());
        assert!(matches("/chats/C1", "/chats").is_none());
    }

    #[test]
    fn test_single_capture() {
        let (consumed, caps) = matches("/chats/{chat_id}", "/chats/C1/messages/M9").unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(caps.get("chat_id").map(String::as_str), Some("C1"));
    }

    #[test]
    fn test_recursive_capture() {
        let (consumed, caps) = matches("/messages/{document=**}", "/messages/M9/replies/R1").unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(caps.get("document").map(String::as_str), Some("M9/replies/R1"));

        // zero remaining segments
        let (consumed, caps) = matches("/messages/{document=**}", "/messages").unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(caps.get("document").map(String::as_str), Some(""));
    }

    #[test]
    fn test_failed_match_leaves_captures() {
        let mut captures = Captures::new();
        captures.insert("chat_id".into(), "C1".into());
        let pattern = PathPattern::parse("/{user_id}/profile").unwrap();
        assert!(pattern.match_prefix(&path("/42/settings"), &mut captures).is_none());
        assert_eq!(captures.len(), 1);
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(matches!(
            PathPattern::parse("/{rest=**}/tail"),
            Err(GateError::RecursiveNotTerminal(_))
        ));
        assert!(matches!(
            PathPattern::parse("/{id}/{id}"),
            Err(GateError::DuplicateCapture { .. })
        ));
        assert!(PathPattern::parse("").is_err());
        assert!(PathPattern::parse("/a//b").is_err());
        assert!(PathPattern::parse("/users/*").is_err());
        assert!(PathPattern::parse("/users/{bad-name}").is_err());
        assert!(PathPattern::parse("/users/{id").is_err());
    }

    #[test]
    fn test_display_and_specificity() {
        let pattern = PathPattern::parse("messages/{document=**}/").unwrap();
        assert_eq!(pattern.to_string(), "/messages/{document=**}");
        assert!(pattern.is_recursive());
        assert_eq!(pattern.specificity(), vec![0, 2]);
        assert!(
            PathPattern::parse("/chats/archive").unwrap().specificity()
                < PathPattern::parse("/chats/{chat_id}").unwrap().specificity()
        );
        assert_eq!(
            PathPattern::parse("/chats/{chat_id}").unwrap().capture_names().collect::<Vec<_>>(),
            vec!["chat_id"]
        );
    }

    #[test]
    fn test_template_render() {
        let template = PathTemplate::parse("/chats/{chat_id}").unwrap();
        assert_eq!(template.vars().collect::<Vec<_>>(), vec!["chat_id"]);

        let mut caps = Captures::new();
        assert_eq!(template.render(&caps), Err("chat_id".to_string()));

        caps.insert("chat_id".into(), "C1".into());
        assert_eq!(template.render(&caps).unwrap(), "/chats/C1");

        assert!(PathTemplate::parse("/chats/{rest=**}").is_err());
    }
}
