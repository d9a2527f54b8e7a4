// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job table access: insert, claim, progress flushes, retry, recovery.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use rq_core::{Job, JobId, JobMetrics, JobStatus, Priority, StepRecord, WorkerId};

use crate::db::Store;
use crate::error::StoreError;

/// Input for a job insert. The store materializes the full row
/// (step records, empty scratchpad, timestamps) from this.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub queue: String,
    pub job_type: String,
    pub payload: Value,
    pub priority: Priority,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    /// Ordered step names; defaults to `["execute"]` at the queue layer.
    pub steps: Vec<String>,
    pub tags: Vec<String>,
    /// Earliest claim eligibility; equal to `created_at` when not delayed.
    pub scheduled_at: i64,
    /// Per-job lease length override.
    pub timeout_ms: Option<i64>,
    pub created_at: i64,
}

impl NewJob {
    fn into_job(self) -> Job {
        let status = if self.scheduled_at > self.created_at {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };
        Job {
            id: self.id,
            queue: self.queue,
            job_type: self.job_type,
            payload: self.payload,
            status,
            priority: self.priority,
            attempts: 0,
            max_attempts: self.max_attempts,
            idempotency_key: self.idempotency_key,
            steps: self.steps.into_iter().map(StepRecord::new).collect(),
            step_state: serde_json::Map::new(),
            error: None,
            metrics: JobMetrics::default(),
            tags: self.tags,
            scheduled_at: self.scheduled_at,
            started_at: None,
            completed_at: None,
            timeout_at: None,
            worker_id: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Result of an insert attempt.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Job),
    /// The idempotency key matched an existing row; that row is returned.
    Deduplicated(Job),
}

impl InsertOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Inserted(job) | Self::Deduplicated(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Self::Inserted(job) | Self::Deduplicated(job) => job,
        }
    }

    pub fn is_deduplicated(&self) -> bool {
        matches!(self, Self::Deduplicated(_))
    }
}

const INSERT_JOB: &str = "INSERT INTO jobs (
        id, queue, job_type, payload, status, priority, attempts, max_attempts,
        idempotency_key, steps, step_state, error, metrics, tags,
        scheduled_at, started_at, completed_at, timeout_at, timeout_ms,
        worker_id, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, '{}', NULL, ?, ?, ?, NULL, NULL, NULL, ?, NULL, ?, ?)
    ON CONFLICT DO NOTHING";

// One eligible row, claim order: priority rank, then earliest eligibility,
// then earliest creation. The outer status condition makes this a CAS: a
// racing claimer sees zero affected rows and re-polls.
const CLAIM_NEXT: &str = "UPDATE jobs SET
        status = 'processing',
        worker_id = ?,
        started_at = ?,
        timeout_at = ? + COALESCE(timeout_ms, ?),
        attempts = attempts + 1,
        metrics = json_set(metrics, '$.wait_ms', ? - created_at),
        updated_at = ?
    WHERE id = (
        SELECT id FROM jobs
        WHERE status IN ('pending', 'scheduled') AND scheduled_at <= ?
        ORDER BY priority ASC, scheduled_at ASC, created_at ASC
        LIMIT 1
    )
    AND status IN ('pending', 'scheduled')
    RETURNING *";

impl Store {
    /// Insert a job, deduplicating on the idempotency key.
    ///
    /// A key collision is not an error: the existing row is returned so the
    /// caller can emit `job:deduplicated` and hand back the original job.
    pub async fn insert_job(&self, new: NewJob) -> Result<InsertOutcome, StoreError> {
        let timeout_ms = new.timeout_ms;
        let job = new.into_job();
        let result = sqlx::query(INSERT_JOB)
            .bind(job.id.as_str())
            .bind(&job.queue)
            .bind(&job.job_type)
            .bind(serde_json::to_string(&job.payload)?)
            .bind(job.status.to_string())
            .bind(job.priority.rank())
            .bind(job.max_attempts as i64)
            .bind(job.idempotency_key.as_deref())
            .bind(serde_json::to_string(&job.steps)?)
            .bind(serde_json::to_string(&job.metrics)?)
            .bind(serde_json::to_string(&job.tags)?)
            .bind(job.scheduled_at)
            .bind(timeout_ms)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(job));
        }

        // Zero rows: the partial unique index on idempotency_key fired.
        let Some(key) = job.idempotency_key.as_deref() else {
            return Err(StoreError::InsertConflict(job.id));
        };
        match self.get_job_by_idempotency_key(key).await? {
            Some(existing) => Ok(InsertOutcome::Deduplicated(existing)),
            None => Err(StoreError::InsertConflict(job.id)),
        }
    }

    /// Insert a batch atomically. Any store failure rolls back every row.
    pub async fn insert_batch(
        &self,
        batch: Vec<NewJob>,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        let mut tx = self.pool().begin().await?;
        let mut outcomes = Vec::with_capacity(batch.len());

        for new in batch {
            let timeout_ms = new.timeout_ms;
            let job = new.into_job();
            let result = sqlx::query(INSERT_JOB)
                .bind(job.id.as_str())
                .bind(&job.queue)
                .bind(&job.job_type)
                .bind(serde_json::to_string(&job.payload)?)
                .bind(job.status.to_string())
                .bind(job.priority.rank())
                .bind(job.max_attempts as i64)
                .bind(job.idempotency_key.as_deref())
                .bind(serde_json::to_string(&job.steps)?)
                .bind(serde_json::to_string(&job.metrics)?)
                .bind(serde_json::to_string(&job.tags)?)
                .bind(job.scheduled_at)
                .bind(timeout_ms)
                .bind(job.created_at)
                .bind(job.updated_at)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 1 {
                outcomes.push(InsertOutcome::Inserted(job));
                continue;
            }
            let Some(key) = job.idempotency_key.as_deref() else {
                return Err(StoreError::InsertConflict(job.id));
            };
            let existing = sqlx::query("SELECT * FROM jobs WHERE idempotency_key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
            match existing {
                Some(row) => outcomes.push(InsertOutcome::Deduplicated(job_from_row(&row)?)),
                None => return Err(StoreError::InsertConflict(job.id)),
            }
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    pub async fn get_job_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Recent jobs, optionally filtered by queue and status.
    pub async fn list_jobs(
        &self,
        queue: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs
             WHERE (? IS NULL OR queue = ?) AND (? IS NULL OR status = ?)
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(queue)
        .bind(queue)
        .bind(status.map(|s| s.to_string()))
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Atomically claim the next eligible job for `worker`.
    ///
    /// Returns `None` when nothing is eligible or a racing worker won;
    /// the caller re-polls rather than retrying a different row.
    pub async fn claim_next(
        &self,
        worker: &WorkerId,
        now_ms: i64,
        default_timeout_ms: i64,
    ) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(CLAIM_NEXT)
            .bind(worker.as_str())
            .bind(now_ms)
            .bind(now_ms)
            .bind(default_timeout_ms)
            .bind(now_ms)
            .bind(now_ms)
            .bind(now_ms)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Flush the step records of a processing job. Called on every step
    /// transition so a crash mid-attempt loses at most the current step.
    ///
    /// Guarded by the lease token (the `attempts` value the claim set):
    /// a worker whose lease was revoked by the stalled scan cannot clobber
    /// a later attempt's progress. Returns false when the lease is gone.
    pub async fn flush_steps(
        &self,
        id: &JobId,
        steps: &[StepRecord],
        lease_attempt: u32,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET steps = ?, updated_at = ?
             WHERE id = ? AND status = 'processing' AND attempts = ?",
        )
        .bind(serde_json::to_string(steps)?)
        .bind(now_ms)
        .bind(id.as_str())
        .bind(lease_attempt as i64)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Complete a processing job and append its metrics history row in one
    /// transaction. Conditional on the caller's lease (`job.attempts`);
    /// returns false when the attempt no longer holds it.
    pub async fn complete_job(
        &self,
        job: &Job,
        metrics: &JobMetrics,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE jobs SET
                status = 'completed', completed_at = ?, steps = ?, metrics = ?,
                error = NULL, timeout_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'processing' AND attempts = ?",
        )
        .bind(now_ms)
        .bind(serde_json::to_string(&job.steps)?)
        .bind(serde_json::to_string(metrics)?)
        .bind(now_ms)
        .bind(job.id.as_str())
        .bind(job.attempts as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO job_metrics_history
                (job_id, queue, job_type, wait_ms, processing_ms, total_ms, retry_count, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.as_str())
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(metrics.wait_ms)
        .bind(metrics.processing_ms)
        .bind(metrics.total_ms)
        .bind(metrics.retry_count as i64)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Reschedule a failed attempt. Steps and step_state are left as-is so
    /// the next attempt resumes from the first unfinished step. Conditional
    /// on the failing attempt's lease token.
    pub async fn schedule_retry(
        &self,
        id: &JobId,
        lease_attempt: u32,
        error: &str,
        retry_at: i64,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET
                status = 'pending', scheduled_at = ?, error = ?,
                worker_id = NULL, started_at = NULL, timeout_at = NULL,
                metrics = json_set(metrics, '$.retry_count', attempts + 1),
                updated_at = ?
             WHERE id = ? AND status = 'processing' AND attempts = ?",
        )
        .bind(retry_at)
        .bind(error)
        .bind(now_ms)
        .bind(id.as_str())
        .bind(lease_attempt as i64)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Conditionally cancel a job that has not been claimed.
    ///
    /// Processing jobs are left alone: no kill signal reaches the handler.
    pub async fn cancel_job(&self, id: &JobId, now_ms: i64) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?
             WHERE id = ? AND status IN ('pending', 'scheduled')
             RETURNING *",
        )
        .bind(now_ms)
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Processing jobs whose lease expired.
    pub async fn fetch_stalled(&self, now_ms: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'processing' AND timeout_at <= ?",
        )
        .bind(now_ms)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn count_stalled(&self, now_ms: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs WHERE status = 'processing' AND timeout_at <= ?",
        )
        .bind(now_ms)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Crash recovery at worker start: release leases held by this worker
    /// identity from a previous process generation.
    pub async fn recover_worker_jobs(
        &self,
        worker: &WorkerId,
        now_ms: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET
                status = 'pending', worker_id = NULL, started_at = NULL,
                timeout_at = NULL, updated_at = ?
             WHERE status = 'processing' AND worker_id = ?",
        )
        .bind(now_ms)
        .bind(worker.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Release leases stale across worker generations: `timeout_at` more
    /// than `stale_after_ms` in the past, whoever held them.
    pub async fn recover_stale_leases(
        &self,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET
                status = 'pending', worker_id = NULL, started_at = NULL,
                timeout_at = NULL, updated_at = ?
             WHERE status = 'processing' AND timeout_at <= ?",
        )
        .bind(now_ms)
        .bind(now_ms - stale_after_ms)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Atomically set one step-state key. Optimistic concurrency: the write
    /// is conditional on the blob observed at read time, retried a few
    /// rounds before reporting contention. Each call is a commit point.
    pub async fn update_step_state(
        &self,
        id: &JobId,
        key: &str,
        value: Value,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        for _ in 0..5 {
            let row = sqlx::query("SELECT step_state FROM jobs WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| StoreError::JobNotFound(*id))?;
            let old_text: String = row.try_get("step_state")?;
            let mut state: serde_json::Map<String, Value> =
                serde_json::from_str(&old_text).map_err(|source| StoreError::Corrupt {
                    job_id: *id,
                    column: "step_state",
                    source,
                })?;
            state.insert(key.to_string(), value.clone());
            let new_text = serde_json::to_string(&state)?;

            let result = sqlx::query(
                "UPDATE jobs SET step_state = ?, updated_at = ?
                 WHERE id = ? AND step_state = ?",
            )
            .bind(&new_text)
            .bind(now_ms)
            .bind(id.as_str())
            .bind(&old_text)
            .execute(self.pool())
            .await?;
            if result.rows_affected() == 1 {
                return Ok(());
            }
        }
        Err(StoreError::StateContention(*id))
    }

    pub async fn get_step_state(
        &self,
        id: &JobId,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT step_state FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::JobNotFound(*id))?;
        let text: String = row.try_get("step_state")?;
        let state: serde_json::Map<String, Value> =
            serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                job_id: *id,
                column: "step_state",
                source,
            })?;
        Ok(state.get(key).cloned())
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    job_id: &JobId,
    column: &'static str,
) -> Result<T, StoreError> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
        job_id: *job_id,
        column,
        source,
    })
}

pub(crate) fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let id = JobId::from_string(row.try_get::<String, _>("id")?);
    let status_text: String = row.try_get("status")?;
    // Unknown statuses cannot occur through this crate's writes; map them
    // to Failed rather than dropping the row.
    let status = JobStatus::parse(&status_text).unwrap_or(JobStatus::Failed);

    Ok(Job {
        id,
        queue: row.try_get("queue")?,
        job_type: row.try_get("job_type")?,
        payload: json_column(row, &id, "payload")?,
        status,
        priority: Priority::from_rank(row.try_get("priority")?),
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
        idempotency_key: row.try_get("idempotency_key")?,
        steps: json_column(row, &id, "steps")?,
        step_state: json_column(row, &id, "step_state")?,
        error: row.try_get("error")?,
        metrics: json_column(row, &id, "metrics")?,
        tags: json_column(row, &id, "tags")?,
        scheduled_at: row.try_get("scheduled_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        timeout_at: row.try_get("timeout_at")?,
        worker_id: row
            .try_get::<Option<String>, _>("worker_id")?
            .map(WorkerId::new),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
