//! Agent session resolution and persistence abstractions.
//!
//! This module defines the `SessionRepository` trait that the
//! infrastructure layer implements, and the `SessionManager` that
//! decides which session a turn runs in and keeps its focus current.

pub mod manager;
pub mod repository;
