//! Scenario tests for the rule engine

use super::*;
use crate::core::document::{Document, DocumentStore, MemoryStore, Value};
use crate::error::StoreError;
use parking_lot::Mutex;
use std::sync::Arc;

fn chat_engine(store: MemoryStore) -> DecisionEngine {
    DecisionEngine::new(Arc::new(presets::chat_rules().unwrap()), Arc::new(store))
}

fn store_with(docs: &[(&str, Document)]) -> MemoryStore {
    let store = MemoryStore::new();
    for (path, doc) in docs {
        store.insert(path, doc.clone()).unwrap();
    }
    store
}

/// Store that always fails
struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn get(&self, _path: &str) -> Result<Option<Document>, StoreError> {
        Err(StoreError::new("connection refused"))
    }
}

/// Store whose participant list changes after every read
struct ShiftingStore {
    reads: Mutex<usize>,
}

impl DocumentStore for ShiftingStore {
    fn get(&self, _path: &str) -> Result<Option<Document>, StoreError> {
        let mut reads = self.reads.lock();
        *reads += 1;
        let participants: Vec<i64> = if *reads == 1 { vec![42] } else { vec![] };
        Ok(Some(Document::new().with("participants", participants)))
    }
}

#[test]
fn test_participant_can_read_chat() {
    let engine = chat_engine(store_with(&[(
        "/chats/C1",
        Document::new().with("participants", vec![42i64, 7]),
    )]));

    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));
    assert!(decision.allow);
    assert_eq!(decision.reason, None);
    assert_eq!(decision.matched_scope.as_deref(), Some("/chats/{chat_id}"));
    assert_eq!(decision.fetches, 1);
}

#[test]
fn test_non_participant_is_denied() {
    let engine = chat_engine(store_with(&[(
        "/chats/C1",
        Document::new().with("participants", vec![1i64, 7]),
    )]));

    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));
    assert_eq!(decision.reason.map(|r| r.to_string()).as_deref(), Some("predicate false"));
}

#[test]
fn test_message_create_dereferences_parent_chat() {
    let engine = chat_engine(store_with(&[(
        "/chats/C1",
        Document::new().with("participants", vec![42i64, 7]),
    )]));

    let decision = engine.evaluate(
        &Request::new(Operation::Create, "/chats/C1/messages/M9").with_subject("42"),
    );
    assert!(decision.allow);
    assert_eq!(
        decision.matched_scope.as_deref(),
        Some("/chats/{chat_id}/messages/{document=**}")
    );
    assert_eq!(decision.fetches, 1);
}

#[test]
fn test_missing_identity_is_unauthenticated() {
    let engine = chat_engine(store_with(&[(
        "/chats/C1",
        Document::new().with("participants", vec![42i64]),
    )]));

    for op in Operation::ALL {
        for request in [
            Request::new(op, "/chats/C1"),
            Request::new(op, "/chats/C1").with_subject(""),
            Request::new(op, "/nowhere/at/all"),
        ] {
            let decision = engine.evaluate(&request);
            assert!(!decision.allow);
            assert_eq!(decision.reason, Some(DenyReason::Unauthenticated));
            assert_eq!(decision.fetches, 0);
        }
    }
}

#[test]
fn test_non_numeric_subject_is_unauthenticated() {
    let engine = chat_engine(store_with(&[(
        "/chats/C1",
        Document::new().with("participants", vec![Value::from("abc")]),
    )]));

    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("abc"));
    assert_eq!(decision.reason, Some(DenyReason::Unauthenticated));
    assert_eq!(decision.fetches, 0);
}

#[test]
fn test_own_statistics_without_membership() {
    let engine = chat_engine(store_with(&[(
        "/users/42/chats/C1",
        Document::new().with("another_participant_id", 7i64),
    )]));

    let decision = engine.evaluate(
        &Request::new(Operation::Get, "/users/42/chats/C1").with_subject("42"),
    );
    assert!(decision.allow);
    assert_eq!(decision.matched_scope.as_deref(), Some("/users/{user_id}/chats/{document=**}"));
    // isCurrentUserStatistics short-circuits before the resource is read
    assert_eq!(decision.fetches, 0);
}

#[test]
fn test_other_participant_reads_statistics() {
    let engine = chat_engine(store_with(&[(
        "/users/42/chats/C1",
        Document::new().with("another_participant_id", 7i64),
    )]));

    let allowed = engine.evaluate(&Request::new(Operation::Get, "/users/42/chats/C1").with_subject("7"));
    assert!(allowed.allow);

    let denied = engine.evaluate(&Request::new(Operation::Get, "/users/42/chats/C1").with_subject("8"));
    assert_eq!(denied.reason, Some(DenyReason::PredicateFalse));

    // statistics root only for the user themselves
    let denied = engine.evaluate(&Request::new(Operation::Get, "/users/42").with_subject("7"));
    assert_eq!(denied.reason, Some(DenyReason::PredicateFalse));
}

#[test]
fn test_delete_is_symmetric_for_statistics() {
    let engine = chat_engine(store_with(&[(
        "/users/42/chats/C1",
        Document::new().with("another_participant_id", 7i64),
    )]));

    for op in [Operation::Create, Operation::Update, Operation::Delete] {
        let decision = engine.evaluate(&Request::new(op, "/users/42/chats/C1").with_subject("42"));
        assert!(decision.allow, "{} should be allowed", op);
    }
}

#[test]
fn test_child_scope_shadows_parent() {
    // messages carry no participants field: the parent rule would deny
    let engine = chat_engine(store_with(&[
        ("/chats/C1", Document::new().with("participants", vec![42i64])),
        ("/chats/C1/messages/M1", Document::new().with("text", "hi")),
    ]));
    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1/messages/M1").with_subject("42"));
    assert!(decision.allow);

    // permissive parent, restrictive child
    let decl = RulesetDecl::new().scope(
        ScopeDecl::new("/docs/{doc_id}")
            .allow(&[OperationSelector::All], Expr::Const(true))
            .scope(ScopeDecl::new("/private/{rest=**}").allow(&[OperationSelector::Read], Expr::Const(false))),
    );
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), Arc::new(MemoryStore::new()));

    let denied = engine.evaluate(&Request::new(Operation::Get, "/docs/D1/private/x").with_subject("1"));
    assert_eq!(denied.reason, Some(DenyReason::PredicateFalse));
    assert_eq!(denied.matched_scope.as_deref(), Some("/docs/{doc_id}/private/{rest=**}"));

    // the child declares no write rule and the parent does not fill in
    let denied = engine.evaluate(&Request::new(Operation::Update, "/docs/D1/private/x").with_subject("1"));
    assert_eq!(denied.reason, Some(DenyReason::NoMatchingRule));

    assert!(engine.evaluate(&Request::new(Operation::Update, "/docs/D1").with_subject("1")).allow);
}

#[test]
fn test_unmatched_path_has_no_rule() {
    let engine = chat_engine(MemoryStore::new());
    let decision = engine.evaluate(&Request::new(Operation::Get, "/groups/G1").with_subject("42"));
    assert_eq!(decision.reason, Some(DenyReason::NoMatchingRule));
    assert_eq!(decision.matched_scope, None);

    // collection path: only the document level has rules
    let decision = engine.evaluate(&Request::new(Operation::List, "/chats").with_subject("42"));
    assert_eq!(decision.reason, Some(DenyReason::NoMatchingRule));
}

#[test]
fn test_literal_scope_without_rule_is_not_decided_by_capture_sibling() {
    let decl = RulesetDecl::new()
        .scope(ScopeDecl::new("/chats/archive").allow(&[OperationSelector::Get], Expr::Const(false)))
        .scope(ScopeDecl::new("/chats/{chat_id}").allow(&[OperationSelector::All], Expr::Const(true)));
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), Arc::new(MemoryStore::new()));

    let decision = engine.evaluate(&Request::new(Operation::Delete, "/chats/archive").with_subject("1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, Some(DenyReason::NoMatchingRule));
    assert_eq!(decision.matched_scope.as_deref(), Some("/chats/archive"));

    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/archive").with_subject("1"));
    assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));

    assert!(engine.evaluate(&Request::new(Operation::Delete, "/chats/C1").with_subject("1")).allow);
}

#[test]
fn test_map_with_ref_key_keeps_its_fields() {
    let decl = RulesetDecl::new().scope(ScopeDecl::new("/posts/{post_id}").allow(
        &[OperationSelector::Get],
        Expr::not(Expr::uid_equals(Operand::resource("owner.blocked_uid"))),
    ));
    let store = MemoryStore::from_json(
        r#"{"/posts/P1": {"owner": {"$ref": "/users/7", "blocked_uid": 42}}}"#,
    )
    .unwrap();
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), Arc::new(store));

    let blocked = engine.evaluate(&Request::new(Operation::Get, "/posts/P1").with_subject("42"));
    assert!(!blocked.allow);
    assert_eq!(blocked.reason, Some(DenyReason::PredicateFalse));

    assert!(engine.evaluate(&Request::new(Operation::Get, "/posts/P1").with_subject("7")).allow);
}

#[test]
fn test_store_failure_fails_closed() {
    let engine = DecisionEngine::new(Arc::new(presets::chat_rules().unwrap()), Arc::new(UnavailableStore));

    for path in ["/chats/C1", "/chats/C1/messages/M9", "/users/42/chats/C1"] {
        let decision = engine.evaluate(&Request::new(Operation::Get, path).with_subject("7"));
        assert!(!decision.allow, "{}", path);
        assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));
        assert!(matches!(decision.faults[0], EvalFault::Fetch(_)));
    }
}

#[test]
fn test_store_failure_under_negation_still_denies() {
    let decl = RulesetDecl::new().scope(
        ScopeDecl::new("/chats/{chat_id}")
            .function("isBanned", Expr::exists(DocSource::lookup("/bans/{chat_id}")))
            .allow(&[OperationSelector::Get], Expr::not(Expr::call("isBanned"))),
    );
    let rules = Arc::new(Ruleset::compile(&decl).unwrap());

    let healthy = DecisionEngine::new(Arc::clone(&rules), Arc::new(MemoryStore::new()));
    assert!(healthy.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("1")).allow);

    let failing = DecisionEngine::new(rules, Arc::new(UnavailableStore));
    let decision = failing.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, Some(DenyReason::PredicateFalse));
}

#[test]
fn test_repeated_dereference_sees_one_value() {
    let decl = RulesetDecl::new().scope(
        ScopeDecl::new("/chats/{chat_id}")
            .function(
                "viaLookup",
                Expr::uid_in(Operand::field(DocSource::lookup("/chats/{chat_id}"), "participants")),
            )
            .function("viaResource", Expr::uid_in(Operand::resource("participants")))
            .allow(
                &[OperationSelector::Get],
                Expr::and([Expr::call("viaLookup"), Expr::call("viaResource")]),
            ),
    );
    let store = Arc::new(ShiftingStore { reads: Mutex::new(0) });
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), store.clone());

    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));
    assert!(decision.allow);
    assert_eq!(decision.fetches, 1);
    assert_eq!(*store.reads.lock(), 1);

    // a new evaluation gets a fresh cache
    let decision = engine.evaluate(&Request::new(Operation::Get, "/chats/C1").with_subject("42"));
    assert!(!decision.allow);
}

#[test]
fn test_constant_rule_fetches_nothing() {
    let decl = RulesetDecl::new()
        .scope(ScopeDecl::new("/public/{doc}").allow(&[OperationSelector::Read], Expr::Authenticated));
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), Arc::new(UnavailableStore));

    let decision = engine.evaluate(&Request::new(Operation::List, "/public/readme").with_subject("5"));
    assert!(decision.allow);
    assert_eq!(decision.fetches, 0);
    assert!(decision.faults.is_empty());
}

#[test]
fn test_follow_reference_from_message() {
    let decl = RulesetDecl::new().scope(
        ScopeDecl::new("/messages/{message_id}").allow(
            &[OperationSelector::Get],
            Expr::uid_in(Operand::field(DocSource::follow(DocSource::Resource, "chat"), "participants")),
        ),
    );
    let store = store_with(&[
        ("/chats/C1", Document::new().with("participants", vec![42i64])),
        ("/messages/M1", Document::new().with("chat", Value::reference("chats/C1"))),
        ("/messages/M2", Document::new().with("chat", Value::reference("/chats/../x"))),
    ]);
    let engine = DecisionEngine::new(Arc::new(Ruleset::compile(&decl).unwrap()), Arc::new(store));

    let decision = engine.evaluate(&Request::new(Operation::Get, "/messages/M1").with_subject("42"));
    assert!(decision.allow);
    assert_eq!(decision.fetches, 2);

    let decision = engine.evaluate(&Request::new(Operation::Get, "/messages/M2").with_subject("42"));
    assert!(!decision.allow);
    assert!(matches!(decision.faults[0], EvalFault::InvalidReference(_)));
}
