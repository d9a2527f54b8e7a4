// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-letter table access.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use rq_core::{DlqId, Job, JobId, JobMetrics};

use crate::db::Store;
use crate::error::StoreError;

/// A job that exhausted its retries, captured at promotion time.
///
/// Immutable except for explicit manual retry, which re-enqueues a fresh job
/// and deletes this record; the original job row remains in `dead_letter`
/// status as an audit trail.
#[derive(Debug, Clone)]
pub struct DeadLetterJob {
    pub id: DlqId,
    pub original_job_id: JobId,
    pub queue: String,
    pub job_type: String,
    pub payload: Value,
    pub error: String,
    pub attempts: u32,
    pub step_state: serde_json::Map<String, Value>,
    pub metrics: JobMetrics,
    pub tags: Vec<String>,
    pub moved_at: i64,
}

impl Store {
    /// Promote an exhausted processing job to the dead-letter table.
    ///
    /// The DLQ insert and the job's terminal transition commit together,
    /// conditional on the lease token (`job.attempts`). Returns `None`
    /// when the job no longer holds that lease (a racing completion or a
    /// newer claim won); nothing is written in that case.
    pub async fn promote_to_dlq(
        &self,
        job: &Job,
        error: &str,
        now_ms: i64,
    ) -> Result<Option<DeadLetterJob>, StoreError> {
        let dlq = DeadLetterJob {
            id: DlqId::new(),
            original_job_id: job.id,
            queue: job.queue.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            error: error.to_string(),
            attempts: job.attempts,
            step_state: job.step_state.clone(),
            metrics: job.metrics,
            tags: job.tags.clone(),
            moved_at: now_ms,
        };

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET
                status = 'dead_letter', error = ?, worker_id = NULL,
                timeout_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'processing' AND attempts = ?",
        )
        .bind(error)
        .bind(now_ms)
        .bind(job.id.as_str())
        .bind(job.attempts as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO dead_letter_jobs
                (id, original_job_id, queue, job_type, payload, error, attempts,
                 step_state, metrics, tags, moved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(dlq.id.as_str())
        .bind(dlq.original_job_id.as_str())
        .bind(&dlq.queue)
        .bind(&dlq.job_type)
        .bind(serde_json::to_string(&dlq.payload)?)
        .bind(&dlq.error)
        .bind(dlq.attempts as i64)
        .bind(serde_json::to_string(&dlq.step_state)?)
        .bind(serde_json::to_string(&dlq.metrics)?)
        .bind(serde_json::to_string(&dlq.tags)?)
        .bind(dlq.moved_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(dlq))
    }

    /// Browse dead letters, newest first, optionally filtered by queue.
    pub async fn list_dead_letters(
        &self,
        queue: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetterJob>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM dead_letter_jobs
             WHERE (? IS NULL OR queue = ?)
             ORDER BY moved_at DESC
             LIMIT ?",
        )
        .bind(queue)
        .bind(queue)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(dlq_from_row).collect()
    }

    pub async fn get_dead_letter(&self, id: &DlqId) -> Result<Option<DeadLetterJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM dead_letter_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| dlq_from_row(&r)).transpose()
    }

    /// Remove a dead-letter record after manual retry. Returns false when
    /// the record was already gone.
    pub async fn delete_dead_letter(&self, id: &DlqId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM dead_letter_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn dlq_from_row(row: &SqliteRow) -> Result<DeadLetterJob, StoreError> {
    let original_job_id = JobId::from_string(row.try_get::<String, _>("original_job_id")?);
    let json = |column: &'static str, text: String| -> Result<Value, StoreError> {
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            job_id: original_job_id,
            column,
            source,
        })
    };

    let payload = json("payload", row.try_get("payload")?)?;
    let step_state = match json("step_state", row.try_get("step_state")?)? {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    let metrics: JobMetrics = serde_json::from_str(&row.try_get::<String, _>("metrics")?)
        .unwrap_or_default();
    let tags: Vec<String> =
        serde_json::from_str(&row.try_get::<String, _>("tags")?).unwrap_or_default();

    Ok(DeadLetterJob {
        id: DlqId::from_string(row.try_get::<String, _>("id")?),
        original_job_id,
        queue: row.try_get("queue")?,
        job_type: row.try_get("job_type")?,
        payload,
        error: row.try_get("error")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        step_state,
        metrics,
        tags,
        moved_at: row.try_get("moved_at")?,
    })
}

#[cfg(test)]
#[path = "dlq_tests.rs"]
mod tests;
