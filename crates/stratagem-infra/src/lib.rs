//! Infrastructure layer for Stratagem.
//!
//! Contains implementations of the ports defined in `stratagem-core`:
//! SQLite storage for sessions and the ontology read-side, HTTP clients
//! for the access-control and orchestrator services, and config/data-dir
//! resolution.

pub mod authz;
pub mod config;
pub mod loader;
pub mod orchestrator;
pub mod snapshot;
pub mod sqlite;
