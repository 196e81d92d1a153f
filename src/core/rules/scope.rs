//! Rule declarations, compilation into a scope tree, and path matching
//!
//! A rule set is a tree of scopes. Each scope matches part of a path, owns
//! helper functions visible to itself and its descendants, and owns one
//! predicate per operation. A nested scope's rules replace its parent's for
//! the paths it matches; only helpers are inherited.

use super::evaluator::fetch_bound;
use super::expr::{DocSource, Expr, Operand};
use super::operation::{Operation, OperationSelector};
use super::pattern::{Captures, PathPattern, PathTemplate};
use crate::core::validation::DocumentPath;
use crate::error::{GateError, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `allow <operations>: if <condition>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowDecl {
    pub operations: Vec<OperationSelector>,
    #[serde(rename = "if")]
    pub condition: Expr,
}

/// Declared scope, before compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDecl {
    #[serde(rename = "match")]
    pub pattern: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, Expr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<AllowDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeDecl>,
}

impl ScopeDecl {
    pub fn new(pattern: impl Into<String>) -> Self {
        ScopeDecl {
            pattern: pattern.into(),
            functions: BTreeMap::new(),
            allow: Vec::new(),
            scopes: Vec::new(),
        }
    }

    /// Declare a helper function
    pub fn function(mut self, name: impl Into<String>, body: Expr) -> Self {
        self.functions.insert(name.into(), body);
        self
    }

    /// Allow `operations` when `condition` holds
    pub fn allow(mut self, operations: &[OperationSelector], condition: Expr) -> Self {
        self.allow.push(AllowDecl {
            operations: operations.to_vec(),
            condition,
        });
        self
    }

    /// Nest a child scope
    pub fn scope(mut self, child: ScopeDecl) -> Self {
        self.scopes.push(child);
        self
    }
}

/// Complete declared rule set: root-level helpers plus top-level scopes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesetDecl {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, Expr>,

    #[serde(default)]
    pub scopes: Vec<ScopeDecl>,
}

impl RulesetDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, name: impl Into<String>, body: Expr) -> Self {
        self.functions.insert(name.into(), body);
        self
    }

    pub fn scope(mut self, scope: ScopeDecl) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compiled scope node
#[derive(Debug, Clone)]
pub struct Scope {
    pattern: PathPattern,
    path: String,
    helpers: BTreeMap<String, Expr>,
    rules: BTreeMap<Operation, Expr>,
    children: Vec<Scope>,
}

impl Scope {
    /// Full pattern from the root, e.g. `/chats/{chat_id}/messages/{document=**}`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Predicate governing `operation`, if this scope declares one
    pub fn rule(&self, operation: Operation) -> Option<&Expr> {
        self.rules.get(&operation)
    }

    pub fn helpers(&self) -> &BTreeMap<String, Expr> {
        &self.helpers
    }

    pub fn children(&self) -> &[Scope] {
        &self.children
    }
}

/// Immutable, compiled rule set shared by all evaluations
#[derive(Debug, Clone)]
pub struct Ruleset {
    helpers: BTreeMap<String, Expr>,
    scopes: Vec<Scope>,
    /// Lookup templates, parsed once, keyed by their declared text
    templates: AHashMap<String, PathTemplate>,
}

/// Scopes from the root to a fully matching scope, with bound captures
#[derive(Debug, Clone)]
pub struct ScopeMatch<'r> {
    chain: Vec<&'r Scope>,
    captures: Captures,
}

impl<'r> ScopeMatch<'r> {
    /// The matched (innermost) scope
    pub fn scope(&self) -> &'r Scope {
        self.chain[self.chain.len() - 1]
    }

    pub fn chain(&self) -> &[&'r Scope] {
        &self.chain
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }
}

/// Outcome of looking up the rule for a path and operation
#[derive(Debug)]
pub enum Resolution<'r> {
    /// A scope matches the full path and declares a rule for the operation
    Governed {
        matched: ScopeMatch<'r>,
        rule: &'r Expr,
    },
    /// Nothing matches, or the matching scope has no rule for the operation
    NoRule { matched: Option<String> },
}

/// Helper lookup along a match chain
///
/// Level 0 holds root helpers, level `i` the helpers of `chain[i - 1]`. A
/// helper body resolves calls lexically, from its own level outward.
#[derive(Debug, Clone)]
pub struct Environment<'r> {
    levels: Vec<&'r BTreeMap<String, Expr>>,
    templates: &'r AHashMap<String, PathTemplate>,
}

impl<'r> Environment<'r> {
    pub fn new(ruleset: &'r Ruleset, chain: &[&'r Scope]) -> Self {
        let mut levels = Vec::with_capacity(chain.len() + 1);
        levels.push(&ruleset.helpers);
        levels.extend(chain.iter().map(|scope| &scope.helpers));
        Environment {
            levels,
            templates: &ruleset.templates,
        }
    }

    /// Compiled form of a lookup template declared in the rule set
    pub fn template(&self, raw: &str) -> Option<&'r PathTemplate> {
        self.templates.get(raw)
    }

    /// Innermost level
    pub fn top(&self) -> usize {
        self.levels.len() - 1
    }

    /// Find `name` at `level` or any enclosing level
    pub fn lookup(&self, name: &str, level: usize) -> Option<(usize, &'r Expr)> {
        let upto = level.min(self.top());
        (0..=upto)
            .rev()
            .find_map(|lvl| self.levels[lvl].get(name).map(|body| (lvl, body)))
    }
}

impl Ruleset {
    /// Compile declarations into the scope tree, validating everything that
    /// can be checked statically
    pub fn compile(decl: &RulesetDecl) -> Result<Ruleset> {
        let mut ctx = CompileContext {
            visible: vec![&decl.functions],
            bound: Vec::new(),
            templates: AHashMap::new(),
            compiled: 0,
        };

        for (name, body) in &decl.functions {
            debug!(helper = %name, "Validating root helper");
            ctx.validate(body, "/")?;
        }

        let mut scopes = decl
            .scopes
            .iter()
            .map(|scope| ctx.compile_scope(scope, ""))
            .collect::<Result<Vec<_>>>()?;
        scopes.sort_by_key(|scope| scope.pattern.specificity());

        info!(
            scopes = ctx.compiled,
            templates = ctx.templates.len(),
            "Compiled rule set"
        );

        Ok(Ruleset {
            helpers: decl.functions.clone(),
            scopes,
            templates: ctx.templates,
        })
    }

    /// Parse JSON declarations and compile them
    pub fn from_json(json: &str) -> Result<Ruleset> {
        Ruleset::compile(&RulesetDecl::from_json(json)?)
    }

    /// Parse TOML declarations and compile them
    pub fn from_toml(text: &str) -> Result<Ruleset> {
        Ruleset::compile(&RulesetDecl::from_toml(text)?)
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn helpers(&self) -> &BTreeMap<String, Expr> {
        &self.helpers
    }

    /// Scopes matching the full path along the single most specific walk
    ///
    /// At each level the most specific non-recursive child matching the front
    /// of the remaining path is taken; a recursive child only consumes the
    /// remainder when that deeper walk cannot reach the end of the path. The
    /// first entry is the fully matching scope, followed by any recursive
    /// child of it that matches the empty remainder.
    pub fn matches<'r>(&'r self, path: &DocumentPath) -> Vec<ScopeMatch<'r>> {
        let mut out = Vec::new();
        let mut chain = Vec::new();
        walk(&self.scopes, path.segments(), &mut chain, &Captures::new(), &mut out);
        out
    }

    /// Select the scope and predicate governing `operation` on `path`
    pub fn resolve<'r>(&'r self, path: &DocumentPath, operation: Operation) -> Resolution<'r> {
        let matches = self.matches(path);
        let first = matches.first().map(|m| m.scope().path().to_string());

        for matched in matches {
            if let Some(rule) = matched.scope().rule(operation) {
                return Resolution::Governed { matched, rule };
            }
        }

        Resolution::NoRule { matched: first }
    }

    /// Helper environment for a match
    pub fn environment<'r>(&'r self, matched: &ScopeMatch<'r>) -> Environment<'r> {
        Environment::new(self, matched.chain())
    }

    /// Most store fetches evaluating `operation` on `path` can cost, or
    /// `None` when no rule governs it
    pub fn fetch_bound(&self, path: &DocumentPath, operation: Operation) -> Option<usize> {
        match self.resolve(path, operation) {
            Resolution::Governed { matched, rule } => {
                Some(fetch_bound(rule, &self.environment(&matched)))
            }
            Resolution::NoRule { .. } => None,
        }
    }
}

fn walk<'r>(
    scopes: &'r [Scope],
    rest: &[String],
    chain: &mut Vec<&'r Scope>,
    captures: &Captures,
    out: &mut Vec<ScopeMatch<'r>>,
) -> bool {
    // siblings are sorted by specificity, so the first hit is the most specific
    let selected = scopes
        .iter()
        .filter(|scope| !scope.pattern.is_recursive())
        .find_map(|scope| {
            let mut bound = captures.clone();
            let consumed = scope.pattern.match_prefix(rest, &mut bound)?;
            Some((scope, consumed, bound))
        });

    if let Some((scope, consumed, bound)) = selected {
        chain.push(scope);
        let found = if consumed == rest.len() {
            out.push(ScopeMatch {
                chain: chain.clone(),
                captures: bound.clone(),
            });
            push_recursive(&scope.children, &[], chain, &bound, out);
            true
        } else {
            walk(&scope.children, &rest[consumed..], chain, &bound, out)
        };
        chain.pop();
        if found {
            return true;
        }
    }

    push_recursive(scopes, rest, chain, captures, out)
}

/// Let the first recursive scope matching `rest` consume all of it
fn push_recursive<'r>(
    scopes: &'r [Scope],
    rest: &[String],
    chain: &mut Vec<&'r Scope>,
    captures: &Captures,
    out: &mut Vec<ScopeMatch<'r>>,
) -> bool {
    for scope in scopes.iter().filter(|scope| scope.pattern.is_recursive()) {
        let mut bound = captures.clone();
        if scope.pattern.match_prefix(rest, &mut bound).is_some() {
            chain.push(scope);
            out.push(ScopeMatch {
                chain: chain.clone(),
                captures: bound,
            });
            chain.pop();
            return true;
        }
    }
    false
}

struct CompileContext<'d> {
    visible: Vec<&'d BTreeMap<String, Expr>>,
    bound: Vec<String>,
    templates: AHashMap<String, PathTemplate>,
    compiled: usize,
}

impl<'d> CompileContext<'d> {
    fn compile_scope(&mut self, decl: &'d ScopeDecl, parent: &str) -> Result<Scope> {
        let pattern = PathPattern::parse(&decl.pattern)?;
        let path = format!("{}{}", parent, pattern);

        if pattern.is_recursive() && !decl.scopes.is_empty() {
            return Err(GateError::NestedUnderRecursive(path));
        }

        let names: Vec<String> = pattern.capture_names().map(String::from).collect();
        for name in &names {
            if self.bound.contains(name) {
                return Err(GateError::DuplicateCapture {
                    name: name.clone(),
                    scope: path,
                });
            }
        }

        self.bound.extend(names.iter().cloned());
        self.visible.push(&decl.functions);
        let compiled = self.compile_body(decl, pattern, path);
        self.visible.pop();
        self.bound.truncate(self.bound.len() - names.len());

        compiled
    }

    fn compile_body(&mut self, decl: &'d ScopeDecl, pattern: PathPattern, path: String) -> Result<Scope> {
        for body in decl.functions.values() {
            self.validate(body, &path)?;
        }

        let mut grouped: BTreeMap<Operation, Vec<Expr>> = BTreeMap::new();
        for allow in &decl.allow {
            if allow.operations.is_empty() {
                return Err(GateError::EmptyAllow(path));
            }
            self.validate(&allow.condition, &path)?;
            for selector in &allow.operations {
                for operation in selector.expand() {
                    grouped
                        .entry(*operation)
                        .or_default()
                        .push(allow.condition.clone());
                }
            }
        }

        // Several allows for one operation are alternatives
        let rules = grouped
            .into_iter()
            .map(|(operation, mut conditions)| {
                let expr = if conditions.len() == 1 {
                    conditions.remove(0)
                } else {
                    Expr::Or(conditions)
                };
                (operation, expr)
            })
            .collect();

        let mut children = decl
            .scopes
            .iter()
            .map(|child| self.compile_scope(child, &path))
            .collect::<Result<Vec<_>>>()?;
        children.sort_by_key(|child| child.pattern.specificity());

        self.compiled += 1;
        debug!(scope = %path, "Compiled scope");

        Ok(Scope {
            pattern,
            path,
            helpers: decl.functions.clone(),
            rules,
            children,
        })
    }

    /// Check helper calls, capture references and lookup templates
    fn validate(&mut self, expr: &Expr, scope: &str) -> Result<()> {
        let mut result = Ok(());
        expr.walk(&mut |node| {
            if result.is_err() {
                return;
            }
            if let Expr::Call(name) = node {
                if !self.visible.iter().any(|level| level.contains_key(name)) {
                    result = Err(GateError::UnknownHelper {
                        name: name.clone(),
                        scope: scope.to_string(),
                    });
                    return;
                }
            }
            for operand in node.operands() {
                if let Operand::Capture(name) = operand {
                    if let Err(e) = self.check_bound(name, scope) {
                        result = Err(e);
                        return;
                    }
                }
            }
            for source in node.doc_sources() {
                if let Err(e) = self.validate_source(source, scope) {
                    result = Err(e);
                    return;
                }
            }
        });
        result
    }

    fn validate_source(&mut self, source: &DocSource, scope: &str) -> Result<()> {
        match source {
            DocSource::Resource => Ok(()),
            DocSource::Lookup(raw) => {
                let template = PathTemplate::parse(raw)?;
                for var in template.vars() {
                    self.check_bound(var, scope)?;
                }
                self.templates.entry(raw.clone()).or_insert(template);
                Ok(())
            }
            DocSource::Follow { doc, .. } => self.validate_source(doc, scope),
        }
    }

    fn check_bound(&self, name: &str, scope: &str) -> Result<()> {
        if self.bound.iter().any(|bound| bound == name) {
            Ok(())
        } else {
            Err(GateError::UnboundCapture {
                name: name.to_string(),
                scope: scope.to_string(),
            })
        }
    }
}
