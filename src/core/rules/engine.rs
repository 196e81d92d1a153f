//! Decision engine: the fail-closed pipeline from request to decision
//!
//! 1. The subject must yield an identity, otherwise `unauthenticated`
//! 2. The target path must resolve to a governing rule, otherwise `no matching rule`
//! 3. The rule is evaluated with a fresh lookup cache: true allows, anything
//!    else is `predicate false`
//!
//! Every step ends in a [`Decision`]. A panic anywhere in the pipeline is
//! caught and denies as `predicate false`, with the panic kept in `faults`.

use super::cache::LookupCache;
use super::evaluator::{EvalFault, Evaluator, RequestContext};
use super::operation::Operation;
use super::scope::{Resolution, Ruleset};
use crate::core::document::{Document, DocumentStore};
use crate::core::identity::Identity;
use crate::core::validation::DocumentPath;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard cap on store fetches per evaluation; `None` means no cap
    pub fetch_budget: Option<usize>,
    /// Maximum nesting of helper calls
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fetch_budget: None,
            max_call_depth: 32,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// One authorization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: Operation,
    pub path: String,
    /// Subject claim of the authenticated principal
    #[serde(default)]
    pub subject: Option<String>,
    /// Current state of the target, when the caller already has it
    #[serde(default)]
    pub resource: Option<Document>,
}

impl Request {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Request {
            operation,
            path: path.into(),
            subject: None,
            resource: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Supply the target's existing state so it is not fetched
    pub fn with_resource(mut self, resource: Document) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Unauthenticated,
    NoMatchingRule,
    PredicateFalse,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "unauthenticated",
            DenyReason::NoMatchingRule => "no matching rule",
            DenyReason::PredicateFalse => "predicate false",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one evaluation
///
/// `faults` is diagnostic only. A denial caused by a fault looks the same to
/// the caller as one caused by a false predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allow: bool,
    /// Full pattern of the scope that governed, or fully matched, the path
    pub matched_scope: Option<String>,
    pub reason: Option<DenyReason>,
    pub faults: Vec<EvalFault>,
    /// Store fetches performed
    pub fetches: usize,
}

impl Decision {
    fn allow(matched_scope: String, faults: Vec<EvalFault>, fetches: usize) -> Self {
        Decision {
            allow: true,
            matched_scope: Some(matched_scope),
            reason: None,
            faults,
            fetches,
        }
    }

    fn deny(reason: DenyReason, matched_scope: Option<String>) -> Self {
        Decision {
            allow: false,
            matched_scope,
            reason: Some(reason),
            faults: Vec::new(),
            fetches: 0,
        }
    }

    fn with_faults(mut self, faults: Vec<EvalFault>, fetches: usize) -> Self {
        self.faults = faults;
        self.fetches = fetches;
        self
    }
}

/// Evaluates requests against a compiled rule set
///
/// The engine holds no per-request state; share it across threads behind an
/// `Arc`.
pub struct DecisionEngine {
    rules: Arc<Ruleset>,
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(rules: Arc<Ruleset>, store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(rules, store, EngineConfig::default())
    }

    pub fn with_config(rules: Arc<Ruleset>, store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        DecisionEngine { rules, store, config }
    }

    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decide a request. Never fails and never panics.
    ///
    /// # Examples
    ///
    /// ```
    /// use docgate::{presets, DecisionEngine, Document, MemoryStore, Operation, Request};
    /// use std::sync::Arc;
    ///
    /// let store = MemoryStore::new();
    /// store.insert("/chats/C1", Document::new().with("participants", vec![42i64, 7])).unwrap();
    /// let engine = DecisionEngine::new(Arc::new(presets::chat_rules().unwrap()), Arc::new(store));
    ///
    /// let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));
    /// assert!(decision.allow);
    ///
    /// let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1"));
    /// assert_eq!(decision.reason.unwrap().to_string(), "unauthenticated");
    /// ```
    pub fn evaluate(&self, request: &Request) -> Decision {
        let decision = match panic::catch_unwind(AssertUnwindSafe(|| self.decide(request))) {
            Ok(decision) => decision,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                Decision::deny(DenyReason::PredicateFalse, None)
                    .with_faults(vec![EvalFault::Internal(message)], 0)
            }
        };

        for fault in &decision.faults {
            warn!(
                operation = %request.operation,
                path = %request.path,
                fault = %fault,
                "Fault during rule evaluation"
            );
        }
        debug!(
            operation = %request.operation,
            path = %request.path,
            allow = decision.allow,
            scope = decision.matched_scope.as_deref().unwrap_or("-"),
            reason = decision.reason.map(|r| r.as_str()).unwrap_or("-"),
            fetches = decision.fetches,
            "Access decision"
        );

        decision
    }

    fn decide(&self, request: &Request) -> Decision {
        let identity = match Identity::from_subject(request.subject.as_deref()) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(error = %e, "Request has no usable identity");
                return Decision::deny(DenyReason::Unauthenticated, None);
            }
        };

        let path = match DocumentPath::parse(&request.path) {
            Ok(path) => path,
            Err(e) => {
                return Decision::deny(DenyReason::NoMatchingRule, None)
                    .with_faults(vec![EvalFault::InvalidPath(e.to_string())], 0);
            }
        };

        let (matched, rule) = match self.rules.resolve(&path, request.operation) {
            Resolution::Governed { matched, rule } => (matched, rule),
            Resolution::NoRule { matched } => {
                return Decision::deny(DenyReason::NoMatchingRule, matched);
            }
        };

        let target = path.to_string();
        let scope = matched.scope().path().to_string();

        let mut cache = LookupCache::new(self.store.as_ref()).with_budget(self.config.fetch_budget);
        if request.operation.has_pre_image() {
            if let Some(snapshot) = &request.resource {
                cache.seed(&target, Some(snapshot.clone()));
            }
        }

        let ctx = RequestContext {
            identity: &identity,
            operation: request.operation,
            target: &target,
            captures: matched.captures(),
        };
        let mut evaluator = Evaluator::new(
            ctx,
            self.rules.environment(&matched),
            &mut cache,
            self.config.max_call_depth,
        );
        let allowed = evaluator.evaluate(rule);
        let faults = evaluator.into_faults();
        let fetches = cache.fetches();

        if allowed {
            Decision::allow(scope, faults, fetches)
        } else {
            Decision::deny(DenyReason::PredicateFalse, Some(scope)).with_faults(faults, fetches)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic during evaluation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::MemoryStore;
    use crate::core::rules::expr::{Expr, Operand};
    use crate::core::rules::scope::{RulesetDecl, ScopeDecl};
    use crate::core::rules::OperationSelector;
    use crate::error::StoreError;

    /// Store that panics on every read
    struct PanickingStore;

    impl DocumentStore for PanickingStore {
        fn get(&self, path: &str) -> std::result::Result<Option<Document>, StoreError> {
            panic!("store exploded reading {}", path)
        }
    }

    fn participants_rules() -> Arc<Ruleset> {
        let decl = RulesetDecl::new().scope(
            ScopeDecl::new("/chats/{chat_id}")
                .allow(&[OperationSelector::Read], Expr::uid_in(Operand::resource("participants"))),
        );
        Arc::new(Ruleset::compile(&decl).unwrap())
    }

    #[test]
    fn test_config_from_toml() {
        let config = EngineConfig::from_toml("fetch_budget = 3").unwrap();
        assert_eq!(config.fetch_budget, Some(3));
        assert_eq!(config.max_call_depth, 32);

        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_snapshot_avoids_fetch() {
        let engine = DecisionEngine::new(participants_rules(), Arc::new(MemoryStore::new()));
        let request = Request::new(Operation::Get, "/chats/C1")
            .with_subject("42")
            .with_resource(Document::new().with("participants", vec![42i64]));

        let decision = engine.evaluate(&request);
        assert!(decision.allow);
        assert_eq!(decision.fetches, 0);
        assert_eq!(decision.matched_scope.as_deref(), Some("/chats/{chat_id}"));
    }

    #[test]
    fn test_missing_resource_denies() {
        let engine = DecisionEngine::new(participants_rules(), Arc::new(MemoryStore::new()));
        let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));

        assert!(!decision.allow);
        assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));
        assert_eq!(decision.fetches, 1);
        assert_eq!(decision.faults, vec![EvalFault::DocumentMissing("/chats/C1".into())]);
    }

    #[test]
    fn test_operation_without_rule() {
        let engine = DecisionEngine::new(participants_rules(), Arc::new(MemoryStore::new()));
        let decision = engine.evaluate(&Request::new(Operation::Delete, "/chats/C1").with_subject("42"));

        assert_eq!(decision.reason, Some(DenyReason::NoMatchingRule));
        assert_eq!(decision.matched_scope.as_deref(), Some("/chats/{chat_id}"));
    }

    #[test]
    fn test_invalid_path_denies() {
        let engine = DecisionEngine::new(participants_rules(), Arc::new(MemoryStore::new()));
        for path in ["", "/chats/../chats/C1", "/chats/{chat_id}", "/chats//C1"] {
            let decision = engine.evaluate(&Request::new(Operation::Get, path).with_subject("42"));
            assert_eq!(decision.reason, Some(DenyReason::NoMatchingRule), "path {:?}", path);
            assert!(matches!(decision.faults[0], EvalFault::InvalidPath(_)));
        }
    }

    #[test]
    fn test_panic_denies_like_false_predicate() {
        let engine = DecisionEngine::new(participants_rules(), Arc::new(PanickingStore));
        let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));

        assert!(!decision.allow);
        assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));
        assert_eq!(decision.matched_scope, None);
        assert!(matches!(&decision.faults[0], EvalFault::Internal(m) if m.contains("store exploded")));
    }

    #[test]
    fn test_budget_exhaustion_denies() {
        let store = MemoryStore::new();
        store
            .insert("/chats/C1", Document::new().with("participants", vec![42i64]))
            .unwrap();
        let config = EngineConfig {
            fetch_budget: Some(0),
            ..Default::default()
        };
        let engine = DecisionEngine::with_config(participants_rules(), Arc::new(store), config);
        let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));

        assert!(!decision.allow);
        assert_eq!(decision.fetches, 0);
        assert!(matches!(decision.faults[0], EvalFault::Fetch(_)));
    }

    #[test]
    fn test_deny_reason_strings() {
        assert_eq!(DenyReason::Unauthenticated.to_string(), "unauthenticated");
        assert_eq!(DenyReason::NoMatchingRule.to_string(), "no matching rule");
        assert_eq!(DenyReason::PredicateFalse.to_string(), "predicate false");
    }
}
