//! Observability for Stratagem.
//!
//! Tracing subscriber setup plus the span attribute vocabulary used to
//! instrument streaming turns.

pub mod stream_attrs;
pub mod tracing_setup;
