//! Path-scoped access rules for a hierarchical document store
//!
//! Provides:
//! - Scope trees compiled from JSON/TOML/Rust declarations
//! - Path matching with literal, `{capture}` and terminal `{name=**}` segments
//! - Helper functions inherited lexically down the scope tree
//! - Cross-document lookups memoized per evaluation
//! - A fail-closed decision engine (default deny, faults deny)

mod cache;
mod engine;
mod evaluator;
mod expr;
mod operation;
mod pattern;
pub mod presets;
mod scope;

pub use cache::LookupCache;
pub use engine::{Decision, DecisionEngine, DenyReason, EngineConfig, Request};
pub use evaluator::{fetch_bound, EvalFault, Evaluator, RequestContext};
pub use expr::{DocSource, Expr, Operand};
pub use operation::{Operation, OperationSelector};
pub use pattern::{Captures, PathPattern, PathTemplate, Segment};
pub use scope::{
    AllowDecl, Environment, Resolution, Ruleset, RulesetDecl, Scope, ScopeDecl, ScopeMatch,
};

#[cfg(test)]
mod tests;
