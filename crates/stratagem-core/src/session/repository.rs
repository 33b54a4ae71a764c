//! SessionRepository trait definition.
//!
//! Persistence operations for agent sessions. The split between
//! `update_metadata` and `record_turn` is deliberate: the former is the
//! single eager write in the layer (focus changes), the latter is the
//! single consolidated end-of-turn write.

use chrono::{DateTime, Utc};
use stratagem_types::context::ContextType;
use stratagem_types::error::RepositoryError;
use stratagem_types::session::{AgentSession, AgentSessionMetadata};
use uuid::Uuid;

/// Repository trait for agent session persistence.
///
/// Implementations live in stratagem-infra (e.g., `SqliteSessionRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait SessionRepository: Send + Sync {
    /// Create a new agent session.
    fn create_session(
        &self,
        session: &AgentSession,
    ) -> impl std::future::Future<Output = Result<AgentSession, RepositoryError>> + Send;

    /// Get a session by its unique ID.
    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<AgentSession>, RepositoryError>> + Send;

    /// Most recent active session for a user's conversation scope.
    fn find_for_scope(
        &self,
        user_id: &Uuid,
        context_type: ContextType,
        entity_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Option<AgentSession>, RepositoryError>> + Send;

    /// Metadata-only write, used when a focus change must land before
    /// the turn runs. Does not touch counters or activity timestamps.
    fn update_metadata(
        &self,
        session_id: &Uuid,
        metadata: &AgentSessionMetadata,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The consolidated end-of-turn write: replaces the metadata blob,
    /// increments `message_count` by one, and advances `last_active_at`.
    fn record_turn(
        &self,
        session_id: &Uuid,
        metadata: &AgentSessionMetadata,
        last_active_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List a user's sessions, most recently active first.
    fn list_sessions(
        &self,
        user_id: &Uuid,
        include_archived: bool,
    ) -> impl std::future::Future<Output = Result<Vec<AgentSession>, RepositoryError>> + Send;

    /// Most recently active sessions across all users.
    fn list_recent(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<AgentSession>, RepositoryError>> + Send;

    /// Count sessions across all users.
    fn count_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
