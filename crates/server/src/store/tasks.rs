use chrono::Utc;

use dispatch_common::ids::TaskId;
use dispatch_common::types::{Task, TaskStatus};

use super::{StoreClient, StoreError};

impl StoreClient {
    /// Create a new task record. Caller has already written the receptor
    /// file and populated `work_items` for each ligand.
    pub async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let docking_params = serde_json::to_string(&task.docking_params)
            .map_err(|e| StoreError::Query(format!("serializing docking params: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, receptor_path, docking_params, status, total_ligands, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.receptor_path)
        .bind(docking_params)
        .bind(task.status.as_db_str())
        .bind(task.total_ligands)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, receptor_path, docking_params, status, total_ligands, created_at
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;

        row.try_into()
    }

    /// Delete a task and its work items. Does not touch the filesystem;
    /// callers remove `tasks/<id>` and `results/<id>` themselves.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM work_items WHERE task_id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn pause_task(&self, id: &TaskId) -> Result<(), StoreError> {
        self.set_task_status(id, TaskStatus::Paused).await
    }

    pub async fn resume_task(&self, id: &TaskId) -> Result<(), StoreError> {
        self.set_task_status(id, TaskStatus::Pending).await
    }

    async fn set_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(status.as_db_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    /// Reset every `processing` work item (and the tasks that own them)
    /// back to `pending`, as an administrative recovery mutation.
    pub async fn reset_all_processing_to_pending(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE work_items SET status = 'pending', last_updated = $1 WHERE status = 'processing'",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query("UPDATE tasks SET status = 'pending' WHERE status = 'processing'")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Reset every terminally `failed` work item back to `pending` with a
    /// fresh retry budget.
    pub async fn reset_all_failed_to_pending(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE work_items SET status = 'pending', retry_count = 0, last_updated = $1 WHERE status = 'failed'",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    receptor_path: String,
    docking_params: String,
    status: String,
    total_ligands: i64,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, StoreError> {
        let docking_params = serde_json::from_str(&row.docking_params)
            .map_err(|e| StoreError::Query(format!("corrupt docking params: {e}")))?;

        Ok(Self {
            id: TaskId::parse(row.id).expect("task id stored in the database is always valid"),
            receptor_path: row.receptor_path,
            docking_params,
            status: TaskStatus::parse(&row.status),
            total_ligands: row.total_ligands,
            created_at: row.created_at,
        })
    }
}
