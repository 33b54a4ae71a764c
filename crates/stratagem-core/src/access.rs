//! Access gating for conversation scopes.
//!
//! Runs before any context assembly: cheap checks against the
//! authorization RPC and direct existence probes. The two target
//! classes degrade differently. Project checks fall back to a local
//! existence lookup when the RPC itself fails (the RPC being down must
//! not take conversations down with it), while entity checks have no
//! fallback: a probe failure denies.

use tracing::warn;
use uuid::Uuid;

use stratagem_types::context::{ContextScope, ContextType, OntologyEntityKind};
use stratagem_types::error::{AuthzError, RepositoryError};

use std::fmt;

/// Permission level asked of the authorization service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Read => write!(f, "read"),
            AccessLevel::Write => write!(f, "write"),
        }
    }
}

/// Outcome of a scope access check. Never an error: every failure mode
/// collapses to a decision here, after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Remote authorization service.
///
/// Implementations live in stratagem-infra (e.g., `HttpAuthzClient`).
pub trait AuthorizationRpc: Send + Sync {
    /// Whether `user_id` holds `level` on the project. A denial is an
    /// `Ok(false)`; `Err` means the question could not be asked.
    fn check_project_access(
        &self,
        project_id: &str,
        level: AccessLevel,
        user_id: Uuid,
    ) -> impl std::future::Future<Output = Result<bool, AuthzError>> + Send;
}

/// Direct existence lookups against local storage.
pub trait EntityProbe: Send + Sync {
    fn project_exists(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn entity_exists(
        &self,
        kind: OntologyEntityKind,
        entity_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

/// Scope gate consulted once per turn, before the ontology load.
pub struct AccessCheckService<A, P> {
    authz: A,
    probe: P,
}

impl<A, P> AccessCheckService<A, P>
where
    A: AuthorizationRpc,
    P: EntityProbe,
{
    pub fn new(authz: A, probe: P) -> Self {
        Self { authz, probe }
    }

    /// Decide whether `user_id` may converse in `scope`.
    ///
    /// Global and project-creation scopes are always allowed. A scope
    /// with no derivable target is allowed too; enforcement for those
    /// happens downstream where a target first materializes.
    pub async fn check_scope(&self, user_id: Uuid, scope: &ContextScope) -> AccessDecision {
        match scope.context_type {
            ContextType::Global | ContextType::ProjectCreate => AccessDecision::Allowed,
            ContextType::Project | ContextType::ProjectAudit | ContextType::ProjectForecast => {
                match scope.resolved_project_id() {
                    Some(project_id) => self.check_project(user_id, project_id).await,
                    None => AccessDecision::Allowed,
                }
            }
            ContextType::Task | ContextType::Plan | ContextType::Goal | ContextType::Document => {
                // entity_kind() covers exactly these four context types
                let Some(kind) = scope.context_type.entity_kind() else {
                    return AccessDecision::Allowed;
                };
                match scope.entity_id.as_deref() {
                    Some(entity_id) => self.check_entity(kind, entity_id).await,
                    None => AccessDecision::Allowed,
                }
            }
        }
    }

    async fn check_project(&self, user_id: Uuid, project_id: &str) -> AccessDecision {
        match self
            .authz
            .check_project_access(project_id, AccessLevel::Read, user_id)
            .await
        {
            Ok(true) => AccessDecision::Allowed,
            Ok(false) => {
                warn!(%user_id, project_id, "project access denied by authorization service");
                AccessDecision::Denied
            }
            Err(err) => {
                warn!(
                    %user_id,
                    project_id,
                    error = %err,
                    "authorization rpc failed, falling back to project existence check"
                );
                match self.probe.project_exists(project_id).await {
                    Ok(true) => AccessDecision::Allowed,
                    Ok(false) => {
                        warn!(project_id, "project not found during access fallback");
                        AccessDecision::Denied
                    }
                    Err(probe_err) => {
                        warn!(
                            project_id,
                            error = %probe_err,
                            "project existence fallback failed"
                        );
                        AccessDecision::Denied
                    }
                }
            }
        }
    }

    async fn check_entity(&self, kind: OntologyEntityKind, entity_id: &str) -> AccessDecision {
        match self.probe.entity_exists(kind, entity_id).await {
            Ok(true) => AccessDecision::Allowed,
            Ok(false) => {
                warn!(%kind, entity_id, "entity not found during access check");
                AccessDecision::Denied
            }
            Err(err) => {
                // No fallback for entities: an unanswerable existence
                // question denies.
                warn!(%kind, entity_id, error = %err, "entity existence check failed");
                AccessDecision::Denied
            }
        }
    }
}
