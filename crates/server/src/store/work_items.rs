use chrono::{DateTime, Utc};

use dispatch_common::ids::TaskId;
use dispatch_common::types::DockingParams;

use super::{StoreClient, StoreError};

/// A leased work item handed back to the dispatcher for a `get_task` reply.
#[derive(Clone, Debug)]
pub struct LeasedWorkItem {
    pub task_id: TaskId,
    pub ligand_id: String,
    pub ligand_file: String,
    pub params: DockingParams,
}

/// Outcome of attempting to lease the next work item.
pub enum LeaseOutcome {
    Leased(LeasedWorkItem),
    NoWorkAvailable,
}

/// Outcome of a `submit_result` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The result was recorded, or the item was already in this terminal
    /// state (idempotent resubmission).
    Accepted,
    /// The work item was no longer `processing` (reassigned by a reclaim,
    /// or already resolved by a different submission); dropped, not an
    /// error, per the idempotency contract.
    Stale,
    /// No such task/ligand pair exists.
    NotFound,
}

#[derive(sqlx::FromRow)]
pub struct WorkItemRow {
    pub status: String,
    pub retry_count: i32,
}

impl StoreClient {
    /// Insert one pending work item per ligand for a freshly created task.
    /// Each pair is `(ligand_id, ligand_file)`: the id is the unique key,
    /// the file is the original filename (with extension) served back to
    /// the compute node.
    pub async fn create_work_items(
        &self,
        task_id: &TaskId,
        ligands: &[(String, String)],
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        for (ligand_id, ligand_file) in ligands {
            sqlx::query(
                r#"
                INSERT INTO work_items (task_id, ligand_id, ligand_file, status, retry_count, last_updated)
                VALUES ($1, $2, $3, 'pending', 0, $4)
                "#,
            )
            .bind(task_id.as_str())
            .bind(ligand_id)
            .bind(ligand_file)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Lease the next eligible work item.
    ///
    /// Picks a task with priority `processing` over `pending` (so a task
    /// already underway is drained before a new one starts), breaking ties
    /// by creation time, then the first `pending` ligand within it. The
    /// whole selection + update happens in one transaction; because the
    /// pool holds a single connection this is equivalent to holding an
    /// exclusive table-wide lock for the duration. Nodes are anonymous:
    /// no caller-supplied identity is recorded against the lease.
    pub async fn lease_next_work_item(&self) -> Result<LeaseOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let task: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT t.id, t.docking_params
            FROM tasks t
            WHERE t.status IN ('processing', 'pending')
              AND EXISTS (
                  SELECT 1 FROM work_items w
                  WHERE w.task_id = t.id AND w.status = 'pending'
              )
            ORDER BY CASE t.status WHEN 'processing' THEN 0 WHEN 'pending' THEN 1 ELSE 2 END,
                     t.created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let Some((task_id, docking_params_raw)) = task else {
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(LeaseOutcome::NoWorkAvailable);
        };

        let ligand: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT ligand_id, ligand_file FROM work_items
            WHERE task_id = $1 AND status = 'pending'
            ORDER BY ligand_id ASC
            LIMIT 1
            "#,
        )
        .bind(&task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let Some((ligand_id, ligand_file)) = ligand else {
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(LeaseOutcome::NoWorkAvailable);
        };

        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'processing', last_updated = $3
            WHERE task_id = $1 AND ligand_id = $2 AND status = 'pending'
            "#,
        )
        .bind(&task_id)
        .bind(&ligand_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            // The row moved out of 'pending' between the SELECT and this
            // UPDATE. Treat as no work this round.
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(LeaseOutcome::NoWorkAvailable);
        }

        sqlx::query("UPDATE tasks SET status = 'processing' WHERE id = $1 AND status = 'pending'")
            .bind(&task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;

        let params: DockingParams = serde_json::from_str(&docking_params_raw)
            .map_err(|e| StoreError::Query(format!("corrupt docking params: {e}")))?;

        Ok(LeaseOutcome::Leased(LeasedWorkItem {
            task_id: TaskId::parse(task_id)
                .expect("task id stored in the database is always valid"),
            ligand_id,
            ligand_file,
            params,
        }))
    }

    /// Record the outcome of a docking attempt.
    ///
    /// A reported failure always moves the row to `failed` and increments
    /// `retry_count`; it is the reclaimer, not this call, that later
    /// decides whether a `failed` row still has retry budget left and is
    /// worth reviving to `pending`. A reported success is idempotent: a
    /// row already `completed` is left untouched and reported as accepted.
    pub async fn submit_result(
        &self,
        task_id: &TaskId,
        ligand_id: &str,
        success: bool,
        output_file: Option<&str>,
        max_retries: u32,
    ) -> Result<SubmitOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let row: Option<WorkItemRow> = sqlx::query_as(
            r#"
            SELECT status, retry_count
            FROM work_items WHERE task_id = $1 AND ligand_id = $2
            "#,
        )
        .bind(task_id.as_str())
        .bind(ligand_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(SubmitOutcome::NotFound);
        };

        if row.status == "completed" {
            // Idempotent resubmission of an already-resolved item.
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(SubmitOutcome::Accepted);
        }

        if row.status != "processing" {
            tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
            return Ok(SubmitOutcome::Stale);
        }

        let now = Utc::now();

        if success {
            let result = sqlx::query(
                r#"
                UPDATE work_items
                SET status = 'completed', output_file = $3, last_updated = $4
                WHERE task_id = $1 AND ligand_id = $2 AND status = 'processing'
                "#,
            )
            .bind(task_id.as_str())
            .bind(ligand_id)
            .bind(output_file)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

            if result.rows_affected() == 0 {
                tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
                return Ok(SubmitOutcome::Stale);
            }
        } else {
            let retry_count = row.retry_count + 1;

            let result = sqlx::query(
                r#"
                UPDATE work_items
                SET status = 'failed', retry_count = $3, last_updated = $4
                WHERE task_id = $1 AND ligand_id = $2 AND status = 'processing'
                "#,
            )
            .bind(task_id.as_str())
            .bind(ligand_id)
            .bind(retry_count)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

            if result.rows_affected() == 0 {
                tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
                return Ok(SubmitOutcome::Stale);
            }
        }

        maybe_complete_task(&mut tx, task_id, max_retries).await?;

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(SubmitOutcome::Accepted)
    }

    /// Reclaim every `processing` or `failed` work item whose lease (or
    /// cooldown) has expired: demote it to `pending` if retry budget
    /// remains, or to the terminal `failed` state once the budget is
    /// exhausted. Sweeping `failed` alongside `processing` re-animates
    /// transiently-failed items after the same cooldown, giving uniform
    /// retry semantics whether the failure was silent (worker vanished
    /// mid-lease) or reported via `submit_result`. Returns the number of
    /// items reclaimed in each direction.
    pub async fn reclaim_expired_leases(
        &self,
        lease_timeout_secs: i64,
        max_retries: u32,
    ) -> Result<ReclaimCounts, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let cutoff = Utc::now() - chrono::Duration::seconds(lease_timeout_secs);

        let expired: Vec<(String, String, String, i32)> = sqlx::query_as(
            r#"
            SELECT task_id, ligand_id, status, retry_count FROM work_items
            WHERE status IN ('processing', 'failed') AND last_updated < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut counts = ReclaimCounts::default();
        let now = Utc::now();

        for (task_id, ligand_id, origin_status, retry_count) in expired {
            // A 'processing' lease timing out silently has never had this
            // attempt counted yet; a 'failed' row was already counted when
            // submit_result recorded the report.
            let new_retry_count = if origin_status == "processing" {
                retry_count + 1
            } else {
                retry_count
            };
            let giving_up = new_retry_count as u32 >= max_retries;
            let next_status = if giving_up { "failed" } else { "pending" };

            sqlx::query(
                r#"
                UPDATE work_items
                SET status = $3, retry_count = $4, last_updated = $5
                WHERE task_id = $1 AND ligand_id = $2 AND status = $6
                "#,
            )
            .bind(&task_id)
            .bind(&ligand_id)
            .bind(next_status)
            .bind(new_retry_count)
            .bind(now)
            .bind(&origin_status)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

            if giving_up {
                counts.failed += 1;
            } else {
                counts.retried += 1;
            }

            if let Ok(task_id) = TaskId::parse(task_id) {
                maybe_complete_task(&mut tx, &task_id, max_retries).await?;
            }
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(counts)
    }
}

/// Tally of a single reclaimer pass, for metrics and logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReclaimCounts {
    pub retried: u64,
    pub failed: u64,
}

/// Promote a task to `completed` once every ligand is in a state that
/// can't still produce more work without external intervention: `completed`,
/// `pending`/`processing` obviously block completion, and a `failed` row
/// only blocks it while its retry budget isn't yet exhausted (the reclaimer
/// may still revive it to `pending`). Checking `pending`/`processing`
/// explicitly (not just the inverse of `completed`) also closes the race
/// where a `get_task` call observes the last pending ligand just before a
/// concurrent `submit_result` marks a different ligand completed.
async fn maybe_complete_task(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: &TaskId,
    max_retries: u32,
) -> Result<(), StoreError> {
    let (remaining,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM work_items
        WHERE task_id = $1
          AND (status IN ('pending', 'processing')
               OR (status = 'failed' AND retry_count < $2))
        "#,
    )
    .bind(task_id.as_str())
    .bind(max_retries as i64)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| StoreError::Query(e.to_string()))?;

    if remaining == 0 {
        sqlx::query("UPDATE tasks SET status = 'completed' WHERE id = $1 AND status != 'completed'")
            .bind(task_id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
    }

    Ok(())
}
