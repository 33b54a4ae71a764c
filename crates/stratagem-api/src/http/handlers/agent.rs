//! SSE streaming agent endpoint.
//!
//! POST /api/v1/agent/stream
//!
//! Runs one conversational turn and relays it as Server-Sent Events.
//! Each SSE event is named after the message kind (`progress`,
//! `tool_call`, ...) with the full JSON message as its data. Every
//! stream ends with a `done` event; failures emit `error` immediately
//! before it.
//!
//! Only pre-stream rejections (auth, validation, rate limit) use HTTP
//! status codes. Once the stream is open, failures are in-band.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::{Stream, StreamExt};

use stratagem_core::context::normalize_context_type;
use stratagem_core::limit::RateLimiter;
use stratagem_observe::stream_attrs;
use stratagem_types::stream::{AgentSseMessage, StreamRequest};

use crate::http::error::AppError;
use crate::http::extractors::auth::AuthenticatedUser;
use crate::state::AppState;

/// POST /api/v1/agent/stream - Run one turn and stream the result.
pub async fn stream_agent(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let decision = state.rate_limiter.check(&user_id.to_string());
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(Duration::from_secs(1)),
        });
    }

    let context_type = normalize_context_type(request.context_type.as_deref().unwrap_or(""));
    let span = tracing::info_span!(
        "agent_stream",
        { stream_attrs::USER_ID } = %user_id,
        { stream_attrs::SESSION_CONTEXT_TYPE } = %context_type,
        { stream_attrs::SESSION_ENTITY_ID } = request.entity_id.as_deref().unwrap_or(""),
        { stream_attrs::SESSION_ID } = tracing::field::Empty,
        { stream_attrs::TURN_OUTCOME } = tracing::field::Empty,
        { stream_attrs::TURN_ERROR_CODE } = tracing::field::Empty,
        { stream_attrs::TURN_MESSAGES_EMITTED } = tracing::field::Empty,
        { stream_attrs::TURN_TOOL_CALLS } = tracing::field::Empty,
        { stream_attrs::TURN_ELAPSED_MS } = tracing::field::Empty,
        { stream_attrs::USAGE_INPUT_TOKENS } = tracing::field::Empty,
        { stream_attrs::USAGE_OUTPUT_TOKENS } = tracing::field::Empty,
    );

    // The spawned turn task inherits this span through `stream_turn`.
    let stream = {
        let _guard = span.enter();
        state.stream_handler.stream_turn(user_id, request)
    };

    // Fill in the outcome attributes as the terminal messages pass
    // through on their way to the client.
    let mut failed = false;
    let mut forwarded: u64 = 0;
    let mut tool_calls: u64 = 0;
    let sse_stream = stream.map(move |message| {
        match &message {
            AgentSseMessage::Error { code, .. } => {
                failed = true;
                span.record(stream_attrs::TURN_OUTCOME, "failed");
                span.record(stream_attrs::TURN_ERROR_CODE, code.to_string().as_str());
            }
            AgentSseMessage::Done {
                session_id,
                usage,
                elapsed_ms,
            } => {
                if !failed {
                    span.record(stream_attrs::TURN_OUTCOME, "completed");
                }
                if let Some(id) = session_id {
                    span.record(stream_attrs::SESSION_ID, id.to_string().as_str());
                }
                span.record(stream_attrs::TURN_MESSAGES_EMITTED, forwarded);
                span.record(stream_attrs::TURN_TOOL_CALLS, tool_calls);
                span.record(stream_attrs::TURN_ELAPSED_MS, *elapsed_ms);
                span.record(
                    stream_attrs::USAGE_INPUT_TOKENS,
                    u64::from(usage.input_tokens),
                );
                span.record(
                    stream_attrs::USAGE_OUTPUT_TOKENS,
                    u64::from(usage.output_tokens),
                );
            }
            display => {
                forwarded += 1;
                if matches!(display, AgentSseMessage::ToolCall { .. }) {
                    tool_calls += 1;
                }
            }
        }

        let event = Event::default()
            .event(message.kind())
            .data(serde_json::to_string(&message).unwrap_or_default());
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
