//! Ready-made rule sets

use super::expr::{DocSource, Expr, Operand};
use super::operation::OperationSelector;
use super::scope::{Ruleset, RulesetDecl, ScopeDecl};
use crate::error::Result;

/// Declarations of the chat application rules
///
/// - `/chats/{chat_id}`: participants of the chat
/// - `/chats/{chat_id}/messages/**`: participants of the parent chat
/// - `/users/{user_id}`: the user themselves
/// - `/users/{user_id}/chats/**`: the user, or the other participant recorded
///   on the statistics document
pub fn chat_rules_decl() -> RulesetDecl {
    let all = [OperationSelector::All];
    let authenticated_and = |condition: Expr| Expr::and([Expr::call("isAuthenticated"), condition]);

    let messages = ScopeDecl::new("/messages/{document=**}")
        .function(
            "isCurrentChatParticipant",
            Expr::uid_in(Operand::field(DocSource::lookup("/chats/{chat_id}"), "participants")),
        )
        .allow(&all, authenticated_and(Expr::call("isCurrentChatParticipant")));

    let chats = ScopeDecl::new("/chats/{chat_id}")
        .function("isChatParticipant", Expr::uid_in(Operand::resource("participants")))
        .allow(&all, authenticated_and(Expr::call("isChatParticipant")))
        .scope(messages);

    let statistics = ScopeDecl::new("/chats/{document=**}").allow(
        &all,
        authenticated_and(Expr::or([
            Expr::call("isCurrentUserStatistics"),
            Expr::call("isChatParticipant"),
        ])),
    );

    let users = ScopeDecl::new("/users/{user_id}")
        .function("isCurrentUserStatistics", Expr::uid_equals(Operand::capture("user_id")))
        .function(
            "isChatParticipant",
            Expr::or([
                Expr::uid_equals(Operand::resource("another_participant_id")),
                Expr::uid_in(Operand::resource("participants")),
            ]),
        )
        .allow(&all, authenticated_and(Expr::call("isCurrentUserStatistics")))
        .scope(statistics);

    RulesetDecl::new()
        .function("isAuthenticated", Expr::Authenticated)
        .scope(chats)
        .scope(users)
}

/// Compiled chat application rules
pub fn chat_rules() -> Result<Ruleset> {
    Ruleset::compile(&chat_rules_decl())
}
