//! SQLite-backed ontology context loader.
//!
//! Assembles the briefing from the projects/tasks/plans/goals/documents
//! tables and keeps a short-lived process-local cache in front of the
//! queries. This cache is deliberately uncoordinated with the
//! session-tier one in `stratagem-core`: it exists to absorb bursts of
//! cache-key churn (rapid focus flips), not to provide freshness
//! guarantees.

use dashmap::DashMap;
use sqlx::Row;
use stratagem_core::context::{generate_cache_key, is_cache_fresh, now_ms};
use stratagem_core::ontology::ContextLoader;
use stratagem_types::context::{ContextScope, OntologyEntityKind};
use stratagem_types::error::ContextLoadError;
use stratagem_types::ontology::{EntityBrief, OntologyContext, ProjectBrief};
use stratagem_types::session::CacheEntry;
use tracing::debug;

use std::fmt::Write as _;
use std::time::Duration;

use crate::sqlite::entity_table;
use crate::sqlite::pool::DatabasePool;

/// Lifetime of the loader-local cache.
pub const LOADER_CACHE_TTL: Duration = Duration::from_secs(60);

/// Child rows listed per entity kind when briefing a project.
const CHILD_ROWS_PER_KIND: i64 = 10;

/// Projects listed when briefing the global scope.
const RECENT_PROJECTS: i64 = 5;

const ENTITY_KINDS: [OntologyEntityKind; 4] = [
    OntologyEntityKind::Task,
    OntologyEntityKind::Plan,
    OntologyEntityKind::Goal,
    OntologyEntityKind::Document,
];

/// SQLite-backed implementation of `ContextLoader`.
pub struct SqliteContextLoader {
    pool: DatabasePool,
    cache: DashMap<String, CacheEntry<OntologyContext>>,
    ttl: Duration,
}

impl SqliteContextLoader {
    pub fn new(pool: DatabasePool) -> Self {
        Self::with_ttl(pool, LOADER_CACHE_TTL)
    }

    pub fn with_ttl(pool: DatabasePool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
            ttl,
        }
    }

    async fn assemble(&self, scope: &ContextScope) -> Result<OntologyContext, ContextLoadError> {
        match (scope.context_type.entity_kind(), scope.entity_id.as_deref()) {
            (Some(kind), Some(entity_id)) => self.assemble_entity(kind, entity_id, scope).await,
            _ => match scope.resolved_project_id() {
                Some(project_id) => self.assemble_project(project_id, scope).await,
                None => self.assemble_global().await,
            },
        }
    }

    /// Briefing for an entity-scoped conversation: the entity itself
    /// plus the project it belongs to.
    async fn assemble_entity(
        &self,
        kind: OntologyEntityKind,
        entity_id: &str,
        scope: &ContextScope,
    ) -> Result<OntologyContext, ContextLoadError> {
        let Some(entity) = self.fetch_entity(kind, entity_id).await? else {
            return Err(ContextLoadError::TargetMissing(format!(
                "{kind} {entity_id}"
            )));
        };

        // The parent may be soft-deleted; the entity still briefs alone.
        let project = self.fetch_project(&entity.project_id).await?;

        let mut summary = match &project {
            Some(p) => format!(
                "{} '{}' ({}) in project {}.",
                capitalize(kind),
                entity.name,
                entity.status,
                p.name
            ),
            None => format!("{} '{}' ({}).", capitalize(kind), entity.name, entity.status),
        };
        push_focus_line(&mut summary, scope);

        let token_estimate = (summary.len() / 4) as u32;
        Ok(OntologyContext {
            summary,
            project: project.map(ProjectRow::into_brief),
            entities: vec![entity.into_brief(kind)],
            token_estimate,
        })
    }

    /// Briefing for a project-scoped conversation: the project row plus
    /// a bounded listing of its children per kind.
    async fn assemble_project(
        &self,
        project_id: &str,
        scope: &ContextScope,
    ) -> Result<OntologyContext, ContextLoadError> {
        let Some(project) = self.fetch_project(project_id).await? else {
            return Err(ContextLoadError::TargetMissing(format!(
                "project {project_id}"
            )));
        };

        let mut entities = Vec::new();
        let mut counts = Vec::with_capacity(ENTITY_KINDS.len());
        for kind in ENTITY_KINDS {
            let children = self.fetch_children(kind, project_id).await?;
            counts.push((kind, self.count_children(kind, project_id).await?));
            entities.extend(children.into_iter().map(|row| row.into_brief(kind)));
        }

        let mut summary = format!("Project {} ({}).", project.name, project.status);
        let listed: Vec<String> = counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(kind, n)| {
                if *n == 1 {
                    format!("1 {kind}")
                } else {
                    format!("{n} {kind}s")
                }
            })
            .collect();
        if !listed.is_empty() {
            let _ = write!(summary, " Contains {}.", listed.join(", "));
        }
        push_focus_line(&mut summary, scope);

        let token_estimate = (summary.len() / 4) as u32;
        Ok(OntologyContext {
            summary,
            project: Some(project.into_brief()),
            entities,
            token_estimate,
        })
    }

    /// Briefing for the global scope: recent project names, no target.
    async fn assemble_global(&self) -> Result<OntologyContext, ContextLoadError> {
        let projects = self.fetch_recent_projects().await?;

        let summary = if projects.is_empty() {
            "No projects in the workspace yet.".to_string()
        } else {
            let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
            format!("Recent projects: {}.", names.join(", "))
        };

        let token_estimate = (summary.len() / 4) as u32;
        Ok(OntologyContext {
            summary,
            project: None,
            entities: Vec::new(),
            token_estimate,
        })
    }

    async fn fetch_project(&self, project_id: &str) -> Result<Option<ProjectRow>, ContextLoadError> {
        let row = sqlx::query(
            "SELECT id, name, status FROM projects WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(project_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| ContextLoadError::Query(e.to_string()))?;

        row.as_ref().map(ProjectRow::from_row).transpose()
    }

    async fn fetch_entity(
        &self,
        kind: OntologyEntityKind,
        entity_id: &str,
    ) -> Result<Option<EntityRow>, ContextLoadError> {
        let sql = format!(
            "SELECT id, project_id, name, status FROM {} WHERE id = ? AND deleted_at IS NULL",
            entity_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| ContextLoadError::Query(e.to_string()))?;

        row.as_ref().map(EntityRow::from_row).transpose()
    }

    async fn fetch_children(
        &self,
        kind: OntologyEntityKind,
        project_id: &str,
    ) -> Result<Vec<EntityRow>, ContextLoadError> {
        let sql = format!(
            "SELECT id, project_id, name, status FROM {}
             WHERE project_id = ? AND deleted_at IS NULL
             ORDER BY created_at DESC LIMIT {CHILD_ROWS_PER_KIND}",
            entity_table(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| ContextLoadError::Query(e.to_string()))?;

        rows.iter().map(EntityRow::from_row).collect()
    }

    async fn count_children(
        &self,
        kind: OntologyEntityKind,
        project_id: &str,
    ) -> Result<i64, ContextLoadError> {
        let sql = format!(
            "SELECT COUNT(*) as cnt FROM {} WHERE project_id = ? AND deleted_at IS NULL",
            entity_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| ContextLoadError::Query(e.to_string()))?;

        row.try_get("cnt")
            .map_err(|e| ContextLoadError::Query(e.to_string()))
    }

    async fn fetch_recent_projects(&self) -> Result<Vec<ProjectRow>, ContextLoadError> {
        let rows = sqlx::query(
            "SELECT id, name, status FROM projects WHERE deleted_at IS NULL
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(RECENT_PROJECTS)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| ContextLoadError::Query(e.to_string()))?;

        rows.iter().map(ProjectRow::from_row).collect()
    }
}

impl ContextLoader for SqliteContextLoader {
    async fn load(&self, scope: &ContextScope) -> Result<OntologyContext, ContextLoadError> {
        let key = generate_cache_key("loader", scope);
        let now = now_ms();

        if let Some(entry) = self.cache.get(&key) {
            if is_cache_fresh(entry.loaded_at, self.ttl, now) {
                debug!(cache_key = %key, "loader cache hit");
                return Ok(entry.payload.clone());
            }
        }

        let context = self.assemble(scope).await?;
        self.cache
            .insert(key.clone(), CacheEntry::new(key, now, context.clone()));
        Ok(context)
    }
}

// ---------------------------------------------------------------------------
// Private Row types
// ---------------------------------------------------------------------------

struct ProjectRow {
    id: String,
    name: String,
    status: String,
}

impl ProjectRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, ContextLoadError> {
        Ok(Self {
            id: row
                .try_get("id")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
            name: row
                .try_get("name")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
            status: row
                .try_get("status")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
        })
    }

    fn into_brief(self) -> ProjectBrief {
        ProjectBrief {
            id: self.id,
            name: self.name,
            status: Some(self.status),
        }
    }
}

struct EntityRow {
    id: String,
    project_id: String,
    name: String,
    status: String,
}

impl EntityRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, ContextLoadError> {
        Ok(Self {
            id: row
                .try_get("id")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
            project_id: row
                .try_get("project_id")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
            name: row
                .try_get("name")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
            status: row
                .try_get("status")
                .map_err(|e| ContextLoadError::Query(e.to_string()))?,
        })
    }

    fn into_brief(self, kind: OntologyEntityKind) -> EntityBrief {
        EntityBrief {
            kind,
            id: self.id,
            name: self.name,
            status: Some(self.status),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Append a line naming the focused entity, when the focus targets one.
/// Built from the normalized focus fields alone; no lookup, and nothing
/// is appended when the focus has no entity to name.
fn push_focus_line(summary: &mut String, scope: &ContextScope) {
    let Some(focus) = &scope.focus else {
        return;
    };
    let Some(kind) = focus.kind.entity_kind() else {
        return;
    };
    let label = focus
        .entity_name
        .as_deref()
        .or(focus.entity_id.as_deref());
    if let Some(label) = label {
        let _ = write!(summary, " Focused on {kind} '{label}'.");
    }
}

fn capitalize(kind: OntologyEntityKind) -> String {
    let s = kind.to_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => s,
    }
}
