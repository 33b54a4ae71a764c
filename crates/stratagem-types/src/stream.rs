//! Streaming turn types.
//!
//! Two tagged unions live here. [`StreamEvent`] is what the upstream
//! agent orchestrator emits during a turn; [`AgentSseMessage`] is what
//! this service forwards to the client over SSE. They are deliberately
//! separate types: the orchestrator's `complete` never reaches the
//! client, and the client's `done` and coded `error` never come from
//! the orchestrator.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::context::{FocusPayload, ProjectFocus};
use crate::ontology::OntologyContext;
use crate::session::LastTurnContext;

use std::fmt;

/// Token usage reported for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TurnUsage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// State of one step in an announced plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Active,
    Done,
}

/// One step in a plan announced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub title: String,
    pub status: PlanStepStatus,
}

/// An event on the orchestrator's turn stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Narration of what the agent is currently doing.
    Progress {
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The agent announced or revised its plan for the turn.
    Plan { steps: Vec<PlanStep> },
    /// The agent invoked a tool.
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolResult {
        id: String,
        name: String,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// The agent moved the conversation onto a different target.
    /// Informational only; stored focus changes exclusively through
    /// client requests.
    ContextShift {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        focus: Option<ProjectFocus>,
        reason: String,
    },
    /// The orchestrator failed mid-turn.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Terminal event of a successful turn.
    Complete {
        #[serde(default)]
        usage: TurnUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

/// Machine-readable failure categories on the client-facing stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorCode {
    /// The caller may not read the requested scope.
    AccessDenied,
    /// Context assembly failed before the orchestrator was reached.
    ContextLoadFailed,
    /// The orchestrator errored or its stream ended without `complete`.
    OrchestratorFailed,
    /// The session row could not be created or loaded.
    SessionUnavailable,
    /// The client went away mid-turn. Recorded in the turn digest;
    /// never actually delivered, since there is nobody left to read it.
    TransportClosed,
}

impl fmt::Display for StreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamErrorCode::AccessDenied => write!(f, "access_denied"),
            StreamErrorCode::ContextLoadFailed => write!(f, "context_load_failed"),
            StreamErrorCode::OrchestratorFailed => write!(f, "orchestrator_failed"),
            StreamErrorCode::SessionUnavailable => write!(f, "session_unavailable"),
            StreamErrorCode::TransportClosed => write!(f, "transport_closed"),
        }
    }
}

/// A message on the client-facing SSE stream.
///
/// Serialized whole as the SSE `data:` payload; the `type` tag inside
/// the JSON is the discriminator, matching the orchestrator's framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentSseMessage {
    Progress {
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Plan { steps: Vec<PlanStep> },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        #[serde(default)]
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    ContextShift {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        focus: Option<ProjectFocus>,
        reason: String,
    },
    /// Turn failure, always followed by exactly one `done`.
    Error {
        code: StreamErrorCode,
        message: String,
    },
    /// Terminal message of every stream, success or failure.
    ///
    /// `session_id` is absent only when the turn failed before a session
    /// row could be resolved.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        #[serde(default)]
        usage: TurnUsage,
        elapsed_ms: u64,
    },
}

impl AgentSseMessage {
    /// Stable name of the message kind, for logs and span fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentSseMessage::Progress { .. } => "progress",
            AgentSseMessage::Plan { .. } => "plan",
            AgentSseMessage::ToolCall { .. } => "tool_call",
            AgentSseMessage::ToolResult { .. } => "tool_result",
            AgentSseMessage::ContextShift { .. } => "context_shift",
            AgentSseMessage::Error { .. } => "error",
            AgentSseMessage::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentSseMessage::Done { .. })
    }
}

/// Body of `POST /api/v1/agent/stream`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRequest {
    pub message: String,
    /// Raw context type string, normalized leniently before use.
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Absent: keep the stored focus. `null`: clear it. Object: replace it.
    #[serde(default, deserialize_with = "double_option")]
    pub project_focus: Option<Option<FocusPayload>>,
    /// Resume an existing session instead of resolving one by scope.
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

impl StreamRequest {
    /// The tri-state reading of `project_focus`.
    pub fn focus_update(&self) -> FocusUpdate<'_> {
        match &self.project_focus {
            None => FocusUpdate::Keep,
            Some(None) => FocusUpdate::Clear,
            Some(Some(payload)) => FocusUpdate::Set(payload),
        }
    }
}

/// What a request asks to do with the session's stored focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusUpdate<'a> {
    /// Field absent: leave the stored focus untouched.
    Keep,
    /// Field explicitly `null`: drop the stored focus.
    Clear,
    /// Field carries a payload: normalize and store it.
    Set(&'a FocusPayload),
}

/// Everything the orchestrator needs to run one turn.
///
/// Assembled by the stream handler after access and context resolution;
/// sent whole as the body of the orchestrator's streaming call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnPrompt {
    pub session_id: Uuid,
    pub message: String,
    pub context: OntologyContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<ProjectFocus>,
    /// Digest of the previous turn, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn: Option<LastTurnContext>,
}

/// Distinguishes a JSON field that is absent from one that is `null`.
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_tagged_decoding() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type": "tool_call", "id": "t1", "name": "search", "arguments": {"q": "x"}}"#,
        )
        .unwrap();
        match event {
            StreamEvent::ToolCall { id, name, arguments } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "search");
                assert_eq!(arguments["q"], "x");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_stream_event_optional_fields_default() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type": "progress", "stage": "planning"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Progress {
                stage: "planning".to_string(),
                detail: None,
            }
        );

        let event: StreamEvent = serde_json::from_str(r#"{"type": "complete"}"#).unwrap();
        match event {
            StreamEvent::Complete { usage, summary } => {
                assert_eq!(usage, TurnUsage::default());
                assert!(summary.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_tag_fails_to_decode() {
        let result = serde_json::from_str::<StreamEvent>(r#"{"type": "telemetry", "x": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sse_message_done_shape() {
        let session_id = Uuid::now_v7();
        let msg = AgentSseMessage::Done {
            session_id: Some(session_id),
            usage: TurnUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
            elapsed_ms: 1234,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["session_id"], session_id.to_string());
        assert_eq!(json["usage"]["output_tokens"], 20);
        assert_eq!(json["elapsed_ms"], 1234);
        assert!(msg.is_terminal());
    }

    #[test]
    fn test_sse_message_done_omits_unresolved_session() {
        let msg = AgentSseMessage::Done {
            session_id: None,
            usage: TurnUsage::default(),
            elapsed_ms: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_sse_message_kind_names() {
        let msg = AgentSseMessage::Error {
            code: StreamErrorCode::AccessDenied,
            message: "no".to_string(),
        };
        assert_eq!(msg.kind(), "error");
        assert!(!msg.is_terminal());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "access_denied");
    }

    #[test]
    fn test_focus_field_absent_means_keep() {
        let req: StreamRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.focus_update(), FocusUpdate::Keep);
    }

    #[test]
    fn test_focus_field_null_means_clear() {
        let req: StreamRequest =
            serde_json::from_str(r#"{"message": "hi", "project_focus": null}"#).unwrap();
        assert_eq!(req.focus_update(), FocusUpdate::Clear);
    }

    #[test]
    fn test_focus_field_object_means_set() {
        let req: StreamRequest = serde_json::from_str(
            r#"{"message": "hi", "project_focus": {"project_id": "P1", "focus_type": "task"}}"#,
        )
        .unwrap();
        match req.focus_update() {
            FocusUpdate::Set(payload) => {
                assert_eq!(payload.project_id.as_deref(), Some("P1"));
                assert_eq!(payload.focus_type.as_deref(), Some("task"));
            }
            other => panic!("wrong reading: {other:?}"),
        }
    }

    #[test]
    fn test_usage_total() {
        let usage = TurnUsage {
            input_tokens: 7,
            output_tokens: 5,
        };
        assert_eq!(usage.total_tokens(), 12);
    }
}
