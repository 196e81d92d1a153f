//! # docgate - Path-Scoped Authorization for Document Stores
//!
//! `docgate` decides whether a principal may get, list, create, update or
//! delete a document in a hierarchical document store. Rules are scoped to
//! path patterns and may depend on fields of *other* documents, e.g. a chat's
//! participant list gates access to the chat's messages.
//!
//! - **Scope trees** compiled once from JSON, TOML or Rust builders
//! - **Lexical helpers**: functions declared in a scope are visible to its descendants
//! - **Per-request lookup cache**: one fetch per distinct path, one consistent view
//! - **Fail-closed**: no identity, no rule, store errors and panics all deny
//!
//! ## Quick Start
//!
//! ```rust
//! use docgate::{presets, DecisionEngine, DenyReason, Document, MemoryStore, Operation, Request};
//! use std::sync::Arc;
//!
//! # fn main() -> docgate::Result<()> {
//! let store = MemoryStore::new();
//! store.insert("/chats/C1", Document::new().with("participants", vec![42i64, 7]))?;
//!
//! let engine = DecisionEngine::new(Arc::new(presets::chat_rules()?), Arc::new(store));
//!
//! // a participant may read the chat and post into it
//! let request = Request::new(Operation::Create, "/chats/C1/messages/M9").with_subject("42");
//! assert!(engine.evaluate(&request).allow);
//!
//! // anyone else may not
//! let request = Request::new(Operation::Get, "/chats/C1").with_subject("5");
//! assert_eq!(engine.evaluate(&request).reason, Some(DenyReason::PredicateFalse));
//! # Ok(())
//! # }
//! ```
//!
//! ## Declaring Rules
//!
//! ```rust
//! use docgate::{DocSource, Expr, Operand, OperationSelector, Ruleset, RulesetDecl, ScopeDecl};
//!
//! # fn main() -> docgate::Result<()> {
//! let decl = RulesetDecl::new()
//!     .function("isAuthenticated", Expr::Authenticated)
//!     .scope(
//!         ScopeDecl::new("/projects/{project_id}")
//!             .function("isMember", Expr::uid_in(Operand::resource("members")))
//!             .allow(&[OperationSelector::Read], Expr::call("isMember"))
//!             .scope(
//!                 ScopeDecl::new("/tasks/{task=**}").allow(
//!                     &[OperationSelector::All],
//!                     Expr::uid_in(Operand::field(DocSource::lookup("/projects/{project_id}"), "members")),
//!                 ),
//!             ),
//!     );
//!
//! let rules = Ruleset::compile(&decl)?;
//! assert_eq!(rules.scopes().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    document::{DocRef, Document, DocumentStore, MemoryStore, Value},
    identity::Identity,
    rules::{
        presets, Decision, DecisionEngine, DenyReason, DocSource, EngineConfig, EvalFault, Expr,
        LookupCache, Operand, Operation, OperationSelector, PathPattern, Request, Ruleset,
        RulesetDecl, ScopeDecl,
    },
    validation::DocumentPath,
};
pub use crate::error::{FetchError, GateError, IdentityError, Result, StoreError};
