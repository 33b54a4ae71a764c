//! Session resolution: scope lookup, lazy creation, and focus handling.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use stratagem_types::context::ProjectFocus;
use stratagem_types::error::RepositoryError;
use stratagem_types::session::{AgentSession, AgentSessionMetadata, SessionStatus};
use stratagem_types::stream::{FocusUpdate, StreamRequest};

use crate::context::{normalize_context_type, normalize_project_focus, project_focus_equals};
use crate::session::repository::SessionRepository;

/// The focus a turn runs under, and whether it differs from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusResolution {
    pub resolved: Option<ProjectFocus>,
    /// True when the request explicitly changed the stored focus; the
    /// change has then already been written.
    pub changed: bool,
}

/// Decides which session a request addresses and keeps it current.
pub struct SessionManager<R> {
    repo: R,
}

impl<R> SessionManager<R>
where
    R: SessionRepository,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Find the session for a request, creating one lazily.
    ///
    /// An explicit `session_id` resumes that session; it must exist and
    /// belong to `user_id`. Otherwise the newest active session for the
    /// request's scope is reused, and a fresh row is created when the
    /// scope has none yet.
    pub async fn resolve_session(
        &self,
        user_id: Uuid,
        request: &StreamRequest,
    ) -> Result<AgentSession, RepositoryError> {
        if let Some(session_id) = request.session_id {
            return match self.repo.get_session(&session_id).await? {
                Some(session) if session.user_id == user_id => Ok(session),
                // A session owned by someone else looks identical to a
                // missing one from the outside.
                _ => Err(RepositoryError::NotFound(format!("session {session_id}"))),
            };
        }

        let context_type = request
            .context_type
            .as_deref()
            .map(normalize_context_type)
            .unwrap_or_default();
        let entity_id = request
            .entity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(existing) = self
            .repo
            .find_for_scope(&user_id, context_type, entity_id.as_deref())
            .await?
        {
            debug!(session_id = %existing.id, %context_type, "reusing session for scope");
            return Ok(existing);
        }

        let now = Utc::now();
        let session = AgentSession {
            id: Uuid::now_v7(),
            user_id,
            context_type,
            entity_id,
            status: SessionStatus::Active,
            message_count: 0,
            agent_metadata: AgentSessionMetadata::default(),
            created_at: now,
            last_active_at: now,
        };
        let created = self.repo.create_session(&session).await?;
        info!(session_id = %created.id, %context_type, "created agent session");
        Ok(created)
    }

    /// Apply the request's tri-state focus field to `metadata`.
    ///
    /// An absent field keeps the stored focus, `null` clears it, and a
    /// payload is normalized and replaces it. Only an actual change is
    /// written, and it is written immediately so a turn that later dies
    /// cannot resurrect a focus the user explicitly moved away from.
    /// `metadata` is updated before the write; on a write error the
    /// caller can still run the turn under the requested focus.
    pub async fn resolve_project_focus(
        &self,
        request: &StreamRequest,
        session_id: Uuid,
        metadata: &mut AgentSessionMetadata,
    ) -> Result<FocusResolution, RepositoryError> {
        let (resolved, changed) = match request.focus_update() {
            FocusUpdate::Keep => (metadata.focus.clone(), false),
            FocusUpdate::Clear => (None, metadata.focus.is_some()),
            FocusUpdate::Set(payload) => {
                let next = normalize_project_focus(payload);
                let changed = !project_focus_equals(metadata.focus.as_ref(), next.as_ref());
                (next, changed)
            }
        };

        if changed {
            metadata.focus = resolved.clone();
            self.repo.update_metadata(&session_id, metadata).await?;
            info!(
                %session_id,
                project_id = resolved.as_ref().map(|f| f.project_id.as_str()),
                "session focus updated"
            );
        }

        Ok(FocusResolution { resolved, changed })
    }

    /// The consolidated end-of-turn write. Replaces the metadata blob,
    /// bumps the message counter and advances activity in one statement.
    pub async fn record_turn(
        &self,
        session_id: &Uuid,
        metadata: &AgentSessionMetadata,
    ) -> Result<(), RepositoryError> {
        self.repo
            .record_turn(session_id, metadata, Utc::now())
            .await
    }

    pub async fn get_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<AgentSession>, RepositoryError> {
        self.repo.get_session(session_id).await
    }

    pub async fn list_sessions(
        &self,
        user_id: &Uuid,
        include_archived: bool,
    ) -> Result<Vec<AgentSession>, RepositoryError> {
        self.repo.list_sessions(user_id, include_archived).await
    }

    /// Most recently active sessions across all users, for operators.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<AgentSession>, RepositoryError> {
        self.repo.list_recent(limit).await
    }

    pub async fn count_sessions(&self) -> Result<u64, RepositoryError> {
        self.repo.count_sessions().await
    }
}
