//! Predicate evaluation against one request
//!
//! Evaluation uses three-valued logic. A leaf that cannot be evaluated (the
//! store failed, a dereferenced document is missing, a field has the wrong
//! type) yields a fault instead of a boolean:
//! - `and` stops at the first `false`, `or` at the first `true`, left to right;
//!   a fault only decides the result when no other operand does
//! - `not` of a fault is still a fault
//! - a fault at the top of a rule denies
//!
//! So a fault can never turn a deny into an allow, not even below a `not`.
//! Coercion failures and missing fields are not faults: the comparison is
//! simply false.

use super::cache::LookupCache;
use super::expr::{DocSource, Expr, Operand};
use super::operation::Operation;
use super::pattern::Captures;
use super::scope::Environment;
use crate::core::document::{Document, Value};
use crate::core::identity::{coerce_int, Identity};
use crate::core::validation::normalize_path;
use crate::error::FetchError;
use std::sync::Arc;
use thiserror::Error;

/// Why part of a predicate could not be evaluated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalFault {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Document '{0}' does not exist")]
    DocumentMissing(String),

    #[error("Operation '{0}' has no existing resource")]
    NoResource(Operation),

    #[error("'{operand}' is {found}, expected {expected}")]
    TypeMismatch {
        operand: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown helper function '{0}'")]
    UnknownHelper(String),

    #[error("Capture '{0}' is not bound")]
    UnboundCapture(String),

    #[error("Helper calls nested deeper than {0}")]
    RecursionLimit(usize),

    #[error("Invalid document reference '{0}'")]
    InvalidReference(String),

    #[error("Invalid target path: {0}")]
    InvalidPath(String),

    #[error("Internal fault: {0}")]
    Internal(String),
}

/// Immutable per-request facts every predicate sees
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub identity: &'a Identity,
    pub operation: Operation,
    /// Canonical target path
    pub target: &'a str,
    pub captures: &'a Captures,
}

/// Evaluates predicates for one request
pub struct Evaluator<'a, 's> {
    ctx: RequestContext<'a>,
    env: Environment<'a>,
    cache: &'a mut LookupCache<'s>,
    level: usize,
    depth: usize,
    max_depth: usize,
    faults: Vec<EvalFault>,
}

impl<'a, 's> Evaluator<'a, 's> {
    pub fn new(
        ctx: RequestContext<'a>,
        env: Environment<'a>,
        cache: &'a mut LookupCache<'s>,
        max_depth: usize,
    ) -> Self {
        let level = env.top();
        Evaluator {
            ctx,
            env,
            cache,
            level,
            depth: 0,
            max_depth,
            faults: Vec::new(),
        }
    }

    /// Evaluate a rule. Anything that is not a definite `true` is `false`;
    /// faults are kept for [`faults`](Self::faults).
    pub fn evaluate(&mut self, expr: &'a Expr) -> bool {
        match self.eval(expr) {
            Ok(result) => result,
            Err(fault) => {
                self.faults.push(fault);
                false
            }
        }
    }

    /// Faults met so far, including ones masked by a short-circuit
    pub fn faults(&self) -> &[EvalFault] {
        &self.faults
    }

    pub fn into_faults(self) -> Vec<EvalFault> {
        self.faults
    }

    fn eval(&mut self, expr: &'a Expr) -> Result<bool, EvalFault> {
        match expr {
            Expr::Const(value) => Ok(*value),
            Expr::Authenticated => Ok(!self.ctx.identity.subject().is_empty()),
            Expr::Call(name) => self.call(name),
            Expr::And(items) => self.junction(items, false),
            Expr::Or(items) => self.junction(items, true),
            Expr::Not(inner) => self.eval(inner).map(|value| !value),
            Expr::UidEquals(operand) => {
                let uid = self.ctx.identity.uid();
                Ok(self.operand(operand)?.as_ref().and_then(coerce_int) == Some(uid))
            }
            Expr::UidIn(operand) => {
                let uid = self.ctx.identity.uid();
                Ok(self
                    .array(operand)?
                    .map(|items| items.iter().any(|item| coerce_int(item) == Some(uid)))
                    .unwrap_or(false))
            }
            Expr::Equals(left, right) => {
                let left = self.operand(left)?;
                let right = self.operand(right)?;
                Ok(match (left.as_ref().and_then(coerce_int), right.as_ref().and_then(coerce_int)) {
                    (Some(l), Some(r)) => l == r,
                    _ => false,
                })
            }
            Expr::Contains { list, item } => {
                let Some(items) = self.array(list)? else {
                    return Ok(false);
                };
                let Some(needle) = self.operand(item)? else {
                    return Ok(false);
                };
                Ok(items.iter().any(|candidate| same_member(candidate, &needle)))
            }
            Expr::Exists(source) => Ok(self.document(source)?.1.is_some()),
        }
    }

    /// `and` when `stop_on` is false, `or` when it is true
    fn junction(&mut self, items: &'a [Expr], stop_on: bool) -> Result<bool, EvalFault> {
        let mut unknown: Option<EvalFault> = None;

        for item in items {
            match self.eval(item) {
                Ok(value) if value == stop_on => {
                    if let Some(masked) = unknown.take() {
                        self.faults.push(masked);
                    }
                    return Ok(stop_on);
                }
                Ok(_) => {}
                Err(fault) if unknown.is_none() => unknown = Some(fault),
                Err(fault) => self.faults.push(fault),
            }
        }

        match unknown {
            Some(fault) => Err(fault),
            None => Ok(!stop_on),
        }
    }

    fn call(&mut self, name: &str) -> Result<bool, EvalFault> {
        let (level, body) = self
            .env
            .lookup(name, self.level)
            .ok_or_else(|| EvalFault::UnknownHelper(name.to_string()))?;

        if self.depth >= self.max_depth {
            return Err(EvalFault::RecursionLimit(self.max_depth));
        }

        let caller = self.level;
        self.level = level;
        self.depth += 1;
        let result = self.eval(body);
        self.depth -= 1;
        self.level = caller;

        result
    }

    /// Resolve an operand. `Ok(None)` is a missing field.
    fn operand(&mut self, operand: &'a Operand) -> Result<Option<Value>, EvalFault> {
        match operand {
            Operand::Uid => Ok(Some(Value::Integer(self.ctx.identity.uid()))),
            Operand::Capture(name) => self
                .ctx
                .captures
                .get(name)
                .map(|value| Some(Value::String(value.clone())))
                .ok_or_else(|| EvalFault::UnboundCapture(name.clone())),
            Operand::Field { doc, field } => {
                let document = self.require(doc)?;
                Ok(document.get(field).cloned())
            }
            Operand::Literal(value) => Ok(Some(value.clone())),
        }
    }

    /// Resolve an operand that must be an array; missing or null is `None`
    fn array(&mut self, operand: &'a Operand) -> Result<Option<Vec<Value>>, EvalFault> {
        match self.operand(operand)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(EvalFault::TypeMismatch {
                operand: describe(operand),
                expected: "array",
                found: other.kind(),
            }),
        }
    }

    /// Document behind `source`, failing when it does not exist
    fn require(&mut self, source: &'a DocSource) -> Result<Arc<Document>, EvalFault> {
        match self.document(source)? {
            (_, Some(document)) => Ok(document),
            (_, None) if matches!(source, DocSource::Resource) => {
                if self.ctx.operation.has_pre_image() {
                    Err(EvalFault::DocumentMissing(self.ctx.target.to_string()))
                } else {
                    Err(EvalFault::NoResource(self.ctx.operation))
                }
            }
            (path, None) => Err(EvalFault::DocumentMissing(path)),
        }
    }

    /// Resolve `source` to its path and, if it exists, the document
    fn document(&mut self, source: &'a DocSource) -> Result<(String, Option<Arc<Document>>), EvalFault> {
        let path = match source {
            DocSource::Resource => {
                if !self.ctx.operation.has_pre_image() {
                    return Ok((self.ctx.target.to_string(), None));
                }
                self.ctx.target.to_string()
            }
            DocSource::Lookup(raw) => {
                // a lookup the rule set never compiled cannot name a document
                let template = self
                    .env
                    .template(raw)
                    .ok_or_else(|| EvalFault::InvalidReference(raw.clone()))?;
                let captures = self.ctx.captures;
                template.render(captures).map_err(|e| {
                    if template.vars().all(|var| captures.contains_key(var)) {
                        EvalFault::InvalidReference(e)
                    } else {
                        EvalFault::UnboundCapture(e)
                    }
                })?
            }
            DocSource::Follow { doc, field } => {
                let parent = self.require(doc)?;
                match parent.get(field) {
                    None | Some(Value::Null) => return Ok((field.clone(), None)),
                    Some(Value::Reference(reference)) => normalize_path(&reference.path)
                        .map_err(|_| EvalFault::InvalidReference(reference.path.clone()))?,
                    Some(other) => {
                        return Err(EvalFault::TypeMismatch {
                            operand: field.clone(),
                            expected: "reference",
                            found: other.kind(),
                        })
                    }
                }
            }
        };

        let document = self.cache.resolve(&path)?;
        Ok((path, document))
    }
}

/// Membership comparison: integers compare after coercion, everything else structurally
fn same_member(candidate: &Value, needle: &Value) -> bool {
    match (coerce_int(candidate), coerce_int(needle)) {
        (Some(a), Some(b)) => a == b,
        _ => candidate == needle,
    }
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Uid => "uid".to_string(),
        Operand::Capture(name) => name.clone(),
        Operand::Field { field, .. } => field.clone(),
        Operand::Literal(value) => value.kind().to_string(),
    }
}

/// Upper bound on store fetches for evaluating `rule`: the distinct document
/// sources reachable from it, following helper calls
pub fn fetch_bound(rule: &Expr, env: &Environment<'_>) -> usize {
    let mut sources: Vec<&DocSource> = Vec::new();
    let mut visited: Vec<(usize, &str)> = Vec::new();
    collect_sources(rule, env, env.top(), &mut sources, &mut visited);
    sources.iter().map(|source| source.depth()).sum()
}

fn collect_sources<'e>(
    expr: &'e Expr,
    env: &Environment<'e>,
    level: usize,
    sources: &mut Vec<&'e DocSource>,
    visited: &mut Vec<(usize, &'e str)>,
) {
    expr.walk(&mut |node| {
        for source in node.doc_sources() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        if let Expr::Call(name) = node {
            if let Some((found, body)) = env.lookup(name, level) {
                if !visited.contains(&(found, name.as_str())) {
                    visited.push((found, name.as_str()));
                    collect_sources(body, env, found, sources, visited);
                }
            }
        }
    });
}
