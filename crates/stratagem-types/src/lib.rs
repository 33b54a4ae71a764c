//! Shared domain types for Stratagem.
//!
//! This crate contains the core domain types used across the Stratagem
//! service: session scopes and focus, the streaming event unions, the
//! assembled ontology context, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod context;
pub mod error;
pub mod ontology;
pub mod session;
pub mod stream;
