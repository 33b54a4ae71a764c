//! Agent orchestrator client.

pub mod http;
