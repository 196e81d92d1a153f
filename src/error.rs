//! Error types for rule compilation, document fetches and identity checks

use thiserror::Error;

/// Result type for fallible setup operations (compiling rules, loading fixtures)
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors raised while building or loading a rule set.
///
/// Evaluating a request never returns one of these: the decision engine maps
/// every failure to a Deny decision.
#[derive(Error, Debug)]
pub enum GateError {
    /// Path pattern could not be parsed
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// `{name=**}` used anywhere but the final segment
    #[error("Recursive capture must be the final segment of '{0}'")]
    RecursiveNotTerminal(String),

    /// Same capture name bound twice along one scope chain
    #[error("Capture '{name}' is declared more than once along '{scope}'")]
    DuplicateCapture { name: String, scope: String },

    /// Helper call that does not resolve in the lexical environment
    #[error("Unknown helper function '{name}' referenced in scope '{scope}'")]
    UnknownHelper { name: String, scope: String },

    /// Capture variable referenced but never bound by an enclosing pattern
    #[error("Capture '{name}' is not bound in scope '{scope}'")]
    UnboundCapture { name: String, scope: String },

    /// A recursive capture consumes the whole remaining path, so nothing can nest below it
    #[error("Scope '{0}' is nested below a recursive capture")]
    NestedUnderRecursive(String),

    /// `allow` with an empty operation list
    #[error("Allow in scope '{0}' names no operations")]
    EmptyAllow(String),

    /// Concrete document path is malformed
    #[error("Invalid document path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Error reported by a document store collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        StoreError {
            message: message.into(),
        }
    }
}

/// Failure resolving a document through the lookup cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The store errored (unavailable, timed out, ...)
    #[error("Fetch of '{path}' failed: {source}")]
    Store { path: String, source: StoreError },

    /// The evaluation already spent its fetch budget
    #[error("Fetch budget of {limit} exhausted")]
    BudgetExceeded { limit: usize },
}

/// Why a request carries no usable identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no subject supplied")]
    Missing,

    #[error("subject is empty")]
    Empty,

    #[error("subject '{0}' is not an integer")]
    NotNumeric(String),
}
