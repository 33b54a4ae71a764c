//! HTTP/REST API layer for Stratagem.
//!
//! Axum-based REST API at `/api/v1/` with API key authentication,
//! envelope response format, and CORS support. The agent stream
//! endpoint speaks SSE; everything else is plain JSON.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
