//! Ontology context assembly.
//!
//! Turns a conversation scope into the prompt-ready briefing defined in
//! `stratagem-types::ontology`, reading the local ontology tables.

pub mod sqlite;
