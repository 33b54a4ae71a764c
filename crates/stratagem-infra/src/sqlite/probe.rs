//! Direct existence lookups against the ontology tables.
//!
//! Backs the access gate's local fallback path. Soft-deleted rows
//! (`deleted_at` set) count as absent.

use sqlx::Row;
use stratagem_core::access::EntityProbe;
use stratagem_types::context::OntologyEntityKind;
use stratagem_types::error::RepositoryError;

use super::entity_table;
use super::pool::DatabasePool;

/// SQLite-backed implementation of `EntityProbe`.
pub struct SqliteEntityProbe {
    pool: DatabasePool,
}

impl SqliteEntityProbe {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl EntityProbe for SqliteEntityProbe {
    async fn project_exists(&self, project_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as cnt FROM projects WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(project_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(count > 0)
    }

    async fn entity_exists(
        &self,
        kind: OntologyEntityKind,
        entity_id: &str,
    ) -> Result<bool, RepositoryError> {
        let sql = format!(
            "SELECT COUNT(*) as cnt FROM {} WHERE id = ? AND deleted_at IS NULL",
            entity_table(kind)
        );
        let row = sqlx::query(&sql)
            .bind(entity_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use chrono::Utc;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn seed_project(pool: &DatabasePool, id: &str) {
        sqlx::query("INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(format!("Project {id}"))
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
    }

    async fn seed_task(pool: &DatabasePool, id: &str, project_id: &str) {
        sqlx::query("INSERT INTO tasks (id, project_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(project_id)
            .bind(format!("Task {id}"))
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_project_exists() {
        let pool = test_pool().await;
        seed_project(&pool, "P1").await;
        let probe = SqliteEntityProbe::new(pool);

        assert!(probe.project_exists("P1").await.unwrap());
        assert!(!probe.project_exists("P404").await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_deleted_project_is_absent() {
        let pool = test_pool().await;
        seed_project(&pool, "P1").await;
        sqlx::query("UPDATE projects SET deleted_at = ? WHERE id = 'P1'")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
        let probe = SqliteEntityProbe::new(pool);

        assert!(!probe.project_exists("P1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entity_exists_per_kind() {
        let pool = test_pool().await;
        seed_project(&pool, "P1").await;
        seed_task(&pool, "T1", "P1").await;
        sqlx::query("INSERT INTO goals (id, project_id, name, created_at) VALUES ('G1', 'P1', 'Goal', ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
        let probe = SqliteEntityProbe::new(pool);

        assert!(probe.entity_exists(OntologyEntityKind::Task, "T1").await.unwrap());
        assert!(probe.entity_exists(OntologyEntityKind::Goal, "G1").await.unwrap());
        // A task id does not exist in the plans table
        assert!(!probe.entity_exists(OntologyEntityKind::Plan, "T1").await.unwrap());
        assert!(!probe.entity_exists(OntologyEntityKind::Document, "D404").await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_deleted_entity_is_absent() {
        let pool = test_pool().await;
        seed_project(&pool, "P1").await;
        seed_task(&pool, "T1", "P1").await;
        sqlx::query("UPDATE tasks SET deleted_at = ? WHERE id = 'T1'")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
        let probe = SqliteEntityProbe::new(pool);

        assert!(!probe.entity_exists(OntologyEntityKind::Task, "T1").await.unwrap());
    }
}
