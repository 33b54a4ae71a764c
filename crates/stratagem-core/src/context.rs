//! Context normalization and cache math.
//!
//! Pure functions, no I/O. Everything here is permissive: clients send
//! context types and focus payloads in whatever casing and completeness
//! they like, and this module turns that into the canonical forms the
//! rest of the service trusts. Unknown inputs degrade (to `global`, to
//! project-wide, to `None`), never error.

use chrono::Utc;
use stratagem_types::context::{ContextScope, ContextType, FocusKind, FocusPayload, ProjectFocus};
use stratagem_types::session::{LastTurnContext, TurnOutcome};
use stratagem_types::stream::{StreamErrorCode, TurnUsage};

use std::time::Duration;

/// Longest user-message prefix kept in `LastTurnContext`.
pub const MESSAGE_HEAD_MAX_CHARS: usize = 200;

/// Current wall clock as epoch milliseconds.
///
/// Cache decisions take `now_ms` as a parameter so tests can pin the
/// clock; production callers pass this.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalize a raw context type string.
///
/// Trims, lowercases, and accepts hyphen, space, and camelCase legacy
/// aliases (`project-audit`, `projectAudit`). Anything unrecognized
/// normalizes to [`ContextType::Global`].
pub fn normalize_context_type(raw: &str) -> ContextType {
    squash(raw).parse().unwrap_or(ContextType::Global)
}

/// Normalize a raw focus type string.
///
/// Same alias rules as [`normalize_context_type`]; unknown or empty
/// strings degrade to [`FocusKind::ProjectWide`].
pub fn normalize_focus_kind(raw: &str) -> FocusKind {
    match squash(raw).as_str() {
        "project_wide" | "projectwide" => FocusKind::ProjectWide,
        "task" => FocusKind::Task,
        "plan" => FocusKind::Plan,
        "goal" => FocusKind::Goal,
        "document" => FocusKind::Document,
        _ => FocusKind::ProjectWide,
    }
}

/// Collapse casing and separators to the canonical snake_case token.
fn squash(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.trim().chars() {
        match ch {
            '-' | ' ' => out.push('_'),
            c if c.is_ascii_uppercase() => {
                // camelCase boundary, but not inside an all-caps run
                if out
                    .chars()
                    .last()
                    .is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
                {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

/// Normalize a wire focus payload.
///
/// Returns `None` when no project id survives trimming; a focus without
/// a project is meaningless. Entity fields are kept only when the focus
/// kind actually targets an entity.
pub fn normalize_project_focus(raw: &FocusPayload) -> Option<ProjectFocus> {
    let project_id = non_empty(raw.project_id.as_deref())?;
    let kind = raw
        .focus_type
        .as_deref()
        .map(normalize_focus_kind)
        .unwrap_or_default();
    let (entity_id, entity_name) = if kind.entity_kind().is_some() {
        (
            non_empty(raw.focus_entity_id.as_deref()),
            non_empty(raw.focus_entity_name.as_deref()),
        )
    } else {
        (None, None)
    };
    Some(ProjectFocus {
        project_id,
        project_name: non_empty(raw.project_name.as_deref()),
        kind,
        entity_id,
        entity_name,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Field-wise equality of two normalized focuses. Both absent is equal.
pub fn project_focus_equals(a: Option<&ProjectFocus>, b: Option<&ProjectFocus>) -> bool {
    a == b
}

/// Build a deterministic cache key for a scope.
///
/// The key moves whenever the context type, entity id, focus project,
/// focus kind, or focus entity change, so a cache entry can never be
/// served across a scope change. `kind` names the cache class
/// (`"ontology"`, `"location_context"`, ...).
pub fn generate_cache_key(kind: &str, scope: &ContextScope) -> String {
    let entity = scope.entity_id.as_deref().unwrap_or("-");
    match &scope.focus {
        Some(focus) => {
            let focus_entity = focus.entity_id.as_deref().unwrap_or("-");
            format!(
                "{kind}:{}:{entity}:{}:{}:{focus_entity}",
                scope.context_type, focus.project_id, focus.kind
            )
        }
        None => format!("{kind}:{}:{entity}:-", scope.context_type),
    }
}

/// Whether a cache entry loaded at `loaded_at_ms` is still fresh at
/// `now_ms`. Strict: an entry exactly `ttl` old is stale.
pub fn is_cache_fresh(loaded_at_ms: i64, ttl: Duration, now_ms: i64) -> bool {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms - loaded_at_ms < ttl_ms
}

/// Assemble the turn digest stored in session metadata.
///
/// Truncates the user message to [`MESSAGE_HEAD_MAX_CHARS`] on a char
/// boundary and records the focus entity the turn ran under.
pub fn summarize_turn(
    message: &str,
    outcome: TurnOutcome,
    error_code: Option<StreamErrorCode>,
    tool_calls: u32,
    usage: TurnUsage,
    elapsed_ms: u64,
    completed_at_ms: i64,
    focus: Option<&ProjectFocus>,
    agent_summary: Option<String>,
) -> LastTurnContext {
    LastTurnContext {
        message_head: message.chars().take(MESSAGE_HEAD_MAX_CHARS).collect(),
        outcome,
        error_code: error_code.map(|c| c.to_string()),
        tool_calls,
        usage,
        elapsed_ms,
        completed_at: completed_at_ms,
        focus_entity_id: focus.and_then(|f| f.entity_id.clone()),
        agent_summary,
    }
}
