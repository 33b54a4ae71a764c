//! Application error type mapping to HTTP status codes and envelope format.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stratagem_types::error::RepositoryError;

use crate::http::response::ApiErrorDetail;

/// Application-level error that maps to HTTP responses.
///
/// Only pre-stream failures surface here. Once the SSE stream is open,
/// failures travel in-band as `error` events instead.
#[derive(Debug)]
pub enum AppError {
    /// Authentication failure.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// The named thing does not exist (or belongs to someone else).
    NotFound(String),
    /// Stream admission denied for this window.
    RateLimited { retry_after: Duration },
    /// Generic internal error.
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
            }
            AppError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!(
                    "rate limit exceeded, retry in {}s",
                    retry_secs(*retry_after)
                ),
            ),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [ApiErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            }]
        });

        let mut response = (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();

        if let AppError::RateLimited { retry_after } = &self {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(retry_secs(*retry_after)),
            );
        }

        response
    }
}

/// Seconds until retry, rounded up so a client that waits exactly this
/// long lands in the next window.
fn retry_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs_f64().ceil().max(1.0) as u64
}
