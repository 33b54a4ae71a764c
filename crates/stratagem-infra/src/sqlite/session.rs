//! SQLite session repository implementation.
//!
//! Implements `SessionRepository` from `stratagem-core` using sqlx with
//! split read/write pools: raw queries, private Row structs, reader for
//! SELECT and writer for mutation.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stratagem_core::session::repository::SessionRepository;
use stratagem_types::context::ContextType;
use stratagem_types::error::RepositoryError;
use stratagem_types::session::{AgentSession, AgentSessionMetadata, SessionStatus};
use tracing::warn;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionRepository`.
pub struct SqliteSessionRepository {
    pool: DatabasePool,
}

impl SqliteSessionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain AgentSession.
struct AgentSessionRow {
    id: String,
    user_id: String,
    context_type: String,
    entity_id: Option<String>,
    status: String,
    message_count: i64,
    agent_metadata: String,
    created_at: String,
    last_active_at: String,
}

impl AgentSessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            context_type: row.try_get("context_type")?,
            entity_id: row.try_get("entity_id")?,
            status: row.try_get("status")?,
            message_count: row.try_get("message_count")?,
            agent_metadata: row.try_get("agent_metadata")?,
            created_at: row.try_get("created_at")?,
            last_active_at: row.try_get("last_active_at")?,
        })
    }

    fn into_session(self) -> Result<AgentSession, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid session id: {e}")))?;
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| RepositoryError::Query(format!("invalid user_id: {e}")))?;
        let context_type: ContextType = self
            .context_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let status: SessionStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;
        let last_active_at = parse_datetime(&self.last_active_at)?;

        // A corrupt metadata blob must never take the session down with
        // it; the session restarts with empty metadata instead.
        let agent_metadata = match AgentSessionMetadata::from_blob(&self.agent_metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    error = %e,
                    "malformed agent_metadata blob, falling back to empty"
                );
                AgentSessionMetadata::default()
            }
        };

        Ok(AgentSession {
            id,
            user_id,
            context_type,
            entity_id: self.entity_id,
            status,
            message_count: self.message_count as u32,
            agent_metadata,
            created_at,
            last_active_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn metadata_blob(metadata: &AgentSessionMetadata) -> Result<String, RepositoryError> {
    metadata
        .to_blob()
        .map_err(|e| RepositoryError::Query(format!("unserializable metadata: {e}")))
}

// ---------------------------------------------------------------------------
// SessionRepository implementation
// ---------------------------------------------------------------------------

impl SessionRepository for SqliteSessionRepository {
    async fn create_session(&self, session: &AgentSession) -> Result<AgentSession, RepositoryError> {
        sqlx::query(
            r#"INSERT INTO agent_sessions (id, user_id, context_type, entity_id, status, message_count, agent_metadata, created_at, last_active_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(session.context_type.to_string())
        .bind(&session.entity_id)
        .bind(session.status.to_string())
        .bind(session.message_count as i64)
        .bind(metadata_blob(&session.agent_metadata)?)
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.last_active_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(session.clone())
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<AgentSession>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM agent_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let session_row = AgentSessionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(session_row.into_session()?))
            }
            None => Ok(None),
        }
    }

    async fn find_for_scope(
        &self,
        user_id: &Uuid,
        context_type: ContextType,
        entity_id: Option<&str>,
    ) -> Result<Option<AgentSession>, RepositoryError> {
        // `IS ?` instead of `= ?` so a NULL entity_id matches scopes
        // without a target (global, project_create).
        let row = sqlx::query(
            r#"SELECT * FROM agent_sessions
               WHERE user_id = ? AND context_type = ? AND entity_id IS ? AND status = 'active'
               ORDER BY last_active_at DESC
               LIMIT 1"#,
        )
        .bind(user_id.to_string())
        .bind(context_type.to_string())
        .bind(entity_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let session_row = AgentSessionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(session_row.into_session()?))
            }
            None => Ok(None),
        }
    }

    async fn update_metadata(
        &self,
        session_id: &Uuid,
        metadata: &AgentSessionMetadata,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE agent_sessions SET agent_metadata = ? WHERE id = ?")
            .bind(metadata_blob(metadata)?)
            .bind(session_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("session {session_id}")));
        }

        Ok(())
    }

    async fn record_turn(
        &self,
        session_id: &Uuid,
        metadata: &AgentSessionMetadata,
        last_active_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE agent_sessions
               SET agent_metadata = ?, message_count = message_count + 1, last_active_at = ?
               WHERE id = ?"#,
        )
        .bind(metadata_blob(metadata)?)
        .bind(format_datetime(&last_active_at))
        .bind(session_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("session {session_id}")));
        }

        Ok(())
    }

    async fn list_sessions(
        &self,
        user_id: &Uuid,
        include_archived: bool,
    ) -> Result<Vec<AgentSession>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM agent_sessions WHERE user_id = ?");
        if !include_archived {
            sql.push_str(" AND status = 'active'");
        }
        sql.push_str(" ORDER BY last_active_at DESC");

        let rows = sqlx::query(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let session_row = AgentSessionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            sessions.push(session_row.into_session()?);
        }

        Ok(sessions)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AgentSession>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM agent_sessions ORDER BY last_active_at DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let session_row = AgentSessionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            sessions.push(session_row.into_session()?);
        }

        Ok(sessions)
    }

    async fn count_sessions(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM agent_sessions")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(count as u64)
    }
}
