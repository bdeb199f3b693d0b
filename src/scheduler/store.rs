//! Task persistence
//!
//! Tasks are read and written whole. Expired tasks behave as absent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::types::{ProcessingTask, TaskError};

/// Storage for in-flight tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Live task by ID; `None` when absent or expired
    async fn get(&self, task_id: &str) -> Result<Option<ProcessingTask>, TaskError>;

    /// Insert or replace
    async fn put(&self, task: &ProcessingTask) -> Result<(), TaskError>;

    async fn delete(&self, task_id: &str) -> Result<(), TaskError>;

    /// Drop every expired task, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, TaskError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, ProcessingTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<ProcessingTask>, TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.get(task_id).is_some_and(|t| t.is_expired()) {
            tasks.remove(task_id);
            return Ok(None);
        }
        Ok(tasks.get(task_id).cloned())
    }

    async fn put(&self, task: &ProcessingTask) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: &str) -> Result<(), TaskError> {
        self.tasks.write().await.remove(task_id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, TaskError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.is_expired());
        Ok(before - tasks.len())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Tasks as JSON rows in `processing_tasks`
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// The pool must already carry the schema (see `db::create_pool`)
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<ProcessingTask>, TaskError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT payload, expires_at FROM processing_tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at < Utc::now().timestamp_millis() {
            sqlx::query("DELETE FROM processing_tasks WHERE id = ?")
                .bind(task_id)
                .execute(&self.pool)
                .await?;
            tracing::debug!(task_id = %task_id, "Purged expired task on read");
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn put(&self, task: &ProcessingTask) -> Result<(), TaskError> {
        let payload = serde_json::to_string(task)?;

        sqlx::query(
            r#"
            INSERT INTO processing_tasks (id, payload, status, expires_at, updated_at)
            VALUES (?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                status = excluded.status,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&task.task_id)
        .bind(payload)
        .bind(task.status.as_str())
        .bind(task.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, task_id: &str) -> Result<(), TaskError> {
        sqlx::query("DELETE FROM processing_tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, TaskError> {
        let result = sqlx::query("DELETE FROM processing_tasks WHERE expires_at < ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaReference;
    use crate::scheduler::types::BatchSizes;
    use sqlx::sqlite::SqlitePoolOptions;

    fn task(ttl: chrono::Duration) -> ProcessingTask {
        ProcessingTask::new(
            vec![
                MediaReference::image("https://o.example/a.jpg"),
                MediaReference::video("https://o.example/b.mp4"),
            ],
            BatchSizes::default(),
            ttl,
            None,
            None,
        )
    }

    async fn sqlite_store() -> SqliteTaskStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();
        SqliteTaskStore::new(pool)
    }

    async fn exercise(store: &dyn TaskStore) {
        let live = task(chrono::Duration::hours(1));
        store.put(&live).await.unwrap();

        let loaded = store.get(&live.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.pending_images, live.pending_images);
        assert_eq!(loaded.total_batches, 1);

        let mut updated = loaded;
        updated.completed_batches = 1;
        store.put(&updated).await.unwrap();
        assert_eq!(
            store.get(&live.task_id).await.unwrap().unwrap().completed_batches,
            1
        );

        store.delete(&live.task_id).await.unwrap();
        assert!(store.get(&live.task_id).await.unwrap().is_none());

        let stale = task(chrono::Duration::seconds(-1));
        store.put(&stale).await.unwrap();
        assert!(store.get(&stale.task_id).await.unwrap().is_none());

        store.put(&task(chrono::Duration::seconds(-1))).await.unwrap();
        store.put(&task(chrono::Duration::hours(1))).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&sqlite_store().await).await;
    }
}
