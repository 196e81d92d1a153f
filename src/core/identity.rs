//! Authenticated principal and strict integer coercion
//!
//! The identity provider hands us a raw subject string (the token `uid`). Rules
//! compare principals numerically, so a subject is only usable when it parses
//! as an integer. Anything else leaves the request unauthenticated.

use crate::core::document::Value;
use crate::error::IdentityError;

/// Principal for one request: the raw subject plus its derived numeric id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    uid: i64,
}

impl Identity {
    /// Build an identity from the subject claim
    ///
    /// # Examples
    /// ```
    /// use docgate::Identity;
    ///
    /// assert_eq!(Identity::from_subject(Some("42")).unwrap().uid(), 42);
    /// assert!(Identity::from_subject(Some("abc")).is_err());
    /// assert!(Identity::from_subject(None).is_err());
    /// ```
    pub fn from_subject(subject: Option<&str>) -> Result<Self, IdentityError> {
        let subject = subject.ok_or(IdentityError::Missing)?;
        if subject.is_empty() {
            return Err(IdentityError::Empty);
        }

        let uid = parse_strict_int(subject)
            .ok_or_else(|| IdentityError::NotNumeric(subject.to_string()))?;

        Ok(Identity {
            subject: subject.to_string(),
            uid,
        })
    }

    /// Raw subject string
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Derived numeric user id
    pub fn uid(&self) -> i64 {
        self.uid
    }
}

/// Parse `-?[0-9]+` into an i64; no whitespace, no sign other than `-`, no overflow
pub fn parse_strict_int(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<i64>().ok()
}

/// Coerce a field value to an integer for identity comparisons
///
/// Only integers and strictly numeric strings coerce. Floats, booleans,
/// arrays and references do not.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::String(s) => parse_strict_int(s),
        _ => None,
    }
}
