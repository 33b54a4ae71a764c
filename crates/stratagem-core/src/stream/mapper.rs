//! Orchestrator event to client message translation.
//!
//! Display-class events pass through, `complete` ends the turn without
//! reaching the client, and `error` becomes a turn fault that the
//! handler turns into the single client-facing `error` message.

use stratagem_types::stream::{AgentSseMessage, StreamErrorCode, StreamEvent, TurnUsage};

/// Event tags this layer understands, matching the serde tags of
/// [`StreamEvent`] one to one.
const REGISTERED_EVENT_TYPES: &[&str] = &[
    "progress",
    "plan",
    "tool_call",
    "tool_result",
    "context_shift",
    "error",
    "complete",
];

/// Tags of every event type with a registered mapping.
pub fn registered_event_types() -> &'static [&'static str] {
    REGISTERED_EVENT_TYPES
}

/// Whether a wire tag names a registered event type. Ingest boundaries
/// use this to reject unknown tags with a useful message instead of a
/// generic deserialization error.
pub fn is_known_event_type(tag: &str) -> bool {
    REGISTERED_EVENT_TYPES.contains(&tag)
}

/// What one orchestrator event means for the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// Forward to the client unchanged.
    Forward(AgentSseMessage),
    /// Terminal success. Nothing is forwarded; the handler emits `done`.
    Complete(TurnCompletion),
    /// Terminal failure. The handler emits the single `error`.
    Fault {
        code: StreamErrorCode,
        message: String,
    },
}

/// What a `complete` event carries out of the turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnCompletion {
    pub usage: TurnUsage,
    pub summary: Option<String>,
}

/// Translate one orchestrator event.
///
/// Exhaustive on purpose: adding a [`StreamEvent`] variant without
/// deciding its client-facing mapping must not compile.
pub fn map_event(event: StreamEvent) -> MapOutcome {
    match event {
        StreamEvent::Progress { stage, detail } => {
            MapOutcome::Forward(AgentSseMessage::Progress { stage, detail })
        }
        StreamEvent::Plan { steps } => MapOutcome::Forward(AgentSseMessage::Plan { steps }),
        StreamEvent::ToolCall {
            id,
            name,
            arguments,
        } => MapOutcome::Forward(AgentSseMessage::ToolCall {
            id,
            name,
            arguments,
        }),
        StreamEvent::ToolResult {
            id,
            name,
            output,
            is_error,
        } => MapOutcome::Forward(AgentSseMessage::ToolResult {
            id,
            name,
            output,
            is_error,
        }),
        // Display only; stored focus changes solely through client
        // requests.
        StreamEvent::ContextShift { focus, reason } => {
            MapOutcome::Forward(AgentSseMessage::ContextShift { focus, reason })
        }
        StreamEvent::Error { message, code } => MapOutcome::Fault {
            code: StreamErrorCode::OrchestratorFailed,
            message: match code {
                Some(code) => format!("{message} ({code})"),
                None => message,
            },
        },
        StreamEvent::Complete { usage, summary } => {
            MapOutcome::Complete(TurnCompletion { usage, summary })
        }
    }
}
