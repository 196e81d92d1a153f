//! Core types: documents, identities, paths and the rule engine

pub mod document;
pub mod identity;
pub mod rules;
pub mod validation;
