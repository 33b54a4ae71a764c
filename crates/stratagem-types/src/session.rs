//! Agent session types.
//!
//! A session is one durable conversation scope for one user. Alongside
//! its fixed columns it carries an `agent_metadata` JSON blob holding
//! the current focus, per-session context caches, and a digest of the
//! most recent turn. The blob is schemaless on the wire but typed here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{ContextType, ProjectFocus};
use crate::ontology::OntologyContext;
use crate::stream::TurnUsage;

use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a session.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('active', 'archived'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "archived" => Ok(SessionStatus::Archived),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

/// One durable conversation scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub context_type: ContextType,
    /// Target entity for entity- and project-scoped context types.
    /// `None` for `global` and `project_create`.
    pub entity_id: Option<String>,
    pub status: SessionStatus,
    pub message_count: u32,
    pub agent_metadata: AgentSessionMetadata,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// A cached payload stamped with the key it was computed under and the
/// epoch-millisecond instant it was loaded.
///
/// Freshness is never decided here; `stratagem-core::context` compares
/// `loaded_at` against a TTL with an injected clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub cache_key: String,
    pub loaded_at: i64,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn new(cache_key: impl Into<String>, loaded_at: i64, payload: T) -> Self {
        Self {
            cache_key: cache_key.into(),
            loaded_at,
            payload,
        }
    }
}

/// The `agent_metadata` blob attached to every session.
///
/// All fields default so that blobs written by older builds (or an
/// empty `{}`) deserialize cleanly. Unknown keys are dropped on
/// rewrite, which is intentional: this process owns the blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSessionMetadata {
    /// Current focus, if the conversation has narrowed onto a project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<ProjectFocus>,
    /// Assembled ontology context for the session scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ontology_cache: Option<CacheEntry<OntologyContext>>,
    /// Where-am-I snapshot (workspace and navigation state).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_context_cache: Option<CacheEntry<serde_json::Value>>,
    /// Entities referenced by recent turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_entities_cache: Option<CacheEntry<serde_json::Value>>,
    /// Outline of the focused document, when one is focused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_structure_cache: Option<CacheEntry<serde_json::Value>>,
    /// Digest of the most recent turn, replaced wholesale each turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_turn_context: Option<LastTurnContext>,
}

impl AgentSessionMetadata {
    /// Parse a stored blob, falling back to the empty metadata when the
    /// blob is malformed. Callers log the fallback; a corrupt blob must
    /// never take the session down with it.
    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(blob)
    }

    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed,
}

/// Digest of the most recent turn, kept for continuity in later turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTurnContext {
    /// First 200 characters of the user message.
    pub message_head: String,
    pub outcome: TurnOutcome,
    /// Wire error code when `outcome` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub tool_calls: u32,
    #[serde(default)]
    pub usage: TurnUsage,
    pub elapsed_ms: u64,
    /// Epoch milliseconds when the turn finished.
    pub completed_at: i64,
    /// Entity the focus pointed at while the turn ran, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_entity_id: Option<String>,
    /// Closing summary reported by the orchestrator, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_summary: Option<String>,
}

/// Typed view over one of the snapshot caches in the metadata blob.
///
/// Lets cache maintenance code address the three generic snapshot slots
/// uniformly without growing a method per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSlot {
    LocationContext,
    LinkedEntities,
    DocStructure,
}

impl SnapshotSlot {
    pub const ALL: [SnapshotSlot; 3] = [
        SnapshotSlot::LocationContext,
        SnapshotSlot::LinkedEntities,
        SnapshotSlot::DocStructure,
    ];

    pub fn get<'a>(
        &self,
        metadata: &'a AgentSessionMetadata,
    ) -> Option<&'a CacheEntry<serde_json::Value>> {
        match self {
            SnapshotSlot::LocationContext => metadata.location_context_cache.as_ref(),
            SnapshotSlot::LinkedEntities => metadata.linked_entities_cache.as_ref(),
            SnapshotSlot::DocStructure => metadata.doc_structure_cache.as_ref(),
        }
    }

    pub fn set(
        &self,
        metadata: &mut AgentSessionMetadata,
        entry: Option<CacheEntry<serde_json::Value>>,
    ) {
        match self {
            SnapshotSlot::LocationContext => metadata.location_context_cache = entry,
            SnapshotSlot::LinkedEntities => metadata.linked_entities_cache = entry,
            SnapshotSlot::DocStructure => metadata.doc_structure_cache = entry,
        }
    }
}

impl fmt::Display for SnapshotSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSlot::LocationContext => write!(f, "location_context"),
            SnapshotSlot::LinkedEntities => write!(f, "linked_entities"),
            SnapshotSlot::DocStructure => write!(f, "doc_structure"),
        }
    }
}
