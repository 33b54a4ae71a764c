//! Business logic and port trait definitions for Stratagem.
//!
//! This crate defines the "ports" (repository and collaborator traits)
//! that the infrastructure layer implements, plus the services that
//! run a streaming turn end to end. It depends only on
//! `stratagem-types` -- never on `stratagem-infra` or any database/IO
//! crate.

pub mod access;
pub mod context;
pub mod limit;
pub mod ontology;
pub mod session;
pub mod stream;
