//! Session read endpoints.
//!
//! Endpoints:
//! - GET /api/v1/sessions      - List the caller's sessions
//! - GET /api/v1/sessions/{id} - Get a single session
//!
//! Sessions are created and advanced by the stream endpoint only;
//! these handlers are read paths for clients restoring a conversation
//! list.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use stratagem_types::session::AgentSession;

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthenticatedUser;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for session listing.
#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    /// Include archived sessions alongside active ones.
    #[serde(default)]
    pub include_archived: bool,
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

/// GET /api/v1/sessions - List the caller's sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<ApiResponse<Vec<AgentSession>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sessions = state
        .sessions
        .list_sessions(&user_id, query.include_archived)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(sessions, request_id, elapsed)))
}

/// GET /api/v1/sessions/{id} - Get a session by ID.
///
/// Sessions belonging to other users answer 404, not 403; their
/// existence is not disclosed.
pub async fn get_session(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<AgentSession>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;
    let session = state
        .sessions
        .get_session(&sid)
        .await?
        .filter(|session| session.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("session {sid}")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(session, request_id, elapsed)))
}
