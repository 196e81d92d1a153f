//! Predicate expressions
//!
//! Expressions are plain data: they are declared in Rust, JSON or TOML,
//! validated once by [`Ruleset::compile`](super::Ruleset::compile) and then
//! evaluated per request by the evaluator. JSON form is externally tagged:
//!
//! ```json
//! {"and": ["authenticated", {"call": "isChatParticipant"}]}
//! {"uid_in": {"field": {"doc": "resource", "field": "participants"}}}
//! {"uid_in": {"field": {"doc": {"lookup": "/chats/{chat_id}"}, "field": "participants"}}}
//! ```

use crate::core::document::Value;
use serde::{Deserialize, Serialize};

/// Boolean predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Constant result
    Const(bool),
    /// The principal has a non-empty subject
    Authenticated,
    /// Evaluate a helper function visible from the matched scope
    Call(String),
    /// All operands true; stops at the first false
    And(Vec<Expr>),
    /// Any operand true; stops at the first true
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Principal id equals the operand coerced to an integer
    UidEquals(Operand),
    /// Principal id is an element of the array operand
    UidIn(Operand),
    /// Both operands coerce to the same integer
    Equals(Operand, Operand),
    /// `item` is an element of the array `list`
    Contains { list: Operand, item: Operand },
    /// The document exists
    Exists(DocSource),
}

impl Expr {
    pub fn call(name: impl Into<String>) -> Self {
        Expr::Call(name.into())
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Or(exprs.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn uid_equals(operand: Operand) -> Self {
        Expr::UidEquals(operand)
    }

    pub fn uid_in(operand: Operand) -> Self {
        Expr::UidIn(operand)
    }

    pub fn equals(left: Operand, right: Operand) -> Self {
        Expr::Equals(left, right)
    }

    pub fn contains(list: Operand, item: Operand) -> Self {
        Expr::Contains { list, item }
    }

    pub fn exists(doc: DocSource) -> Self {
        Expr::Exists(doc)
    }

    /// Visit this expression and every nested one, depth first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Not(inner) => inner.walk(visit),
            _ => {}
        }
    }

    /// Operands referenced directly by this node (not by nested nodes)
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Expr::UidEquals(op) | Expr::UidIn(op) => vec![op],
            Expr::Equals(left, right) => vec![left, right],
            Expr::Contains { list, item } => vec![list, item],
            _ => Vec::new(),
        }
    }

    /// Document sources referenced directly by this node
    pub fn doc_sources(&self) -> Vec<&DocSource> {
        match self {
            Expr::Exists(doc) => vec![doc],
            _ => self
                .operands()
                .into_iter()
                .filter_map(|op| match op {
                    Operand::Field { doc, .. } => Some(doc),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Value-producing leaf of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Principal's numeric id
    Uid,
    /// Value captured from the request path
    Capture(String),
    /// Field of a document
    Field { doc: DocSource, field: String },
    Literal(Value),
}

impl Operand {
    pub fn capture(name: impl Into<String>) -> Self {
        Operand::Capture(name.into())
    }

    pub fn field(doc: DocSource, field: impl Into<String>) -> Self {
        Operand::Field {
            doc,
            field: field.into(),
        }
    }

    /// Field of the target document's existing state
    pub fn resource(field: impl Into<String>) -> Self {
        Operand::field(DocSource::Resource, field)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }
}

/// Where a document comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocSource {
    /// Existing state of the request target
    Resource,
    /// Document at a path built from captures, e.g. `/chats/{chat_id}`
    Lookup(String),
    /// Document referenced by a field of another document
    Follow { doc: Box<DocSource>, field: String },
}

impl DocSource {
    pub fn lookup(template: impl Into<String>) -> Self {
        DocSource::Lookup(template.into())
    }

    pub fn follow(doc: DocSource, field: impl Into<String>) -> Self {
        DocSource::Follow {
            doc: Box::new(doc),
            field: field.into(),
        }
    }

    /// Number of document resolutions this source needs
    pub fn depth(&self) -> usize {
        match self {
            DocSource::Resource | DocSource::Lookup(_) => 1,
            DocSource::Follow { doc, .. } => doc.depth() + 1,
        }
    }
}
