// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue stats snapshots and metrics history reads.
//!
//! Callers read stats from the `queue_stats` snapshot table, never via
//! ad-hoc scans of `jobs`; the recompute runs on the queue's stats interval.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use rq_core::JobId;

use crate::db::Store;
use crate::error::StoreError;

/// Per-queue snapshot row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStatsRow {
    pub queue: String,
    pub pending: i64,
    pub scheduled: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    pub updated_at: i64,
}

/// One row of the append-only metrics history.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSample {
    pub job_id: JobId,
    pub queue: String,
    pub job_type: String,
    pub wait_ms: i64,
    pub processing_ms: i64,
    pub total_ms: i64,
    pub retry_count: u32,
    pub recorded_at: i64,
}

impl Store {
    /// Recompute every queue's counts and averages from the jobs table and
    /// replace the snapshot rows.
    pub async fn recompute_stats(&self, now_ms: i64) -> Result<Vec<QueueStatsRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT queue,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'scheduled' THEN 1 ELSE 0 END) AS scheduled,
                SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END) AS processing,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'dead_letter' THEN 1 ELSE 0 END) AS dead_letter,
                AVG(CASE WHEN started_at IS NOT NULL
                    THEN json_extract(metrics, '$.wait_ms') END) AS avg_wait_ms,
                AVG(CASE WHEN status = 'completed'
                    THEN json_extract(metrics, '$.processing_ms') END) AS avg_processing_ms
             FROM jobs
             GROUP BY queue",
        )
        .fetch_all(self.pool())
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        let mut tx = self.pool().begin().await?;
        for row in &rows {
            let snapshot = QueueStatsRow {
                queue: row.try_get("queue")?,
                pending: row.try_get("pending")?,
                scheduled: row.try_get("scheduled")?,
                processing: row.try_get("processing")?,
                completed: row.try_get("completed")?,
                failed: row.try_get("failed")?,
                dead_letter: row.try_get("dead_letter")?,
                avg_wait_ms: row.try_get::<Option<f64>, _>("avg_wait_ms")?.unwrap_or(0.0),
                avg_processing_ms: row
                    .try_get::<Option<f64>, _>("avg_processing_ms")?
                    .unwrap_or(0.0),
                updated_at: now_ms,
            };
            sqlx::query(
                "INSERT OR REPLACE INTO queue_stats
                    (queue, pending, scheduled, processing, completed, failed,
                     dead_letter, avg_wait_ms, avg_processing_ms, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&snapshot.queue)
            .bind(snapshot.pending)
            .bind(snapshot.scheduled)
            .bind(snapshot.processing)
            .bind(snapshot.completed)
            .bind(snapshot.failed)
            .bind(snapshot.dead_letter)
            .bind(snapshot.avg_wait_ms)
            .bind(snapshot.avg_processing_ms)
            .bind(snapshot.updated_at)
            .execute(&mut *tx)
            .await?;
            snapshots.push(snapshot);
        }
        tx.commit().await?;
        Ok(snapshots)
    }

    pub async fn get_queue_stats(&self, queue: &str) -> Result<Option<QueueStatsRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM queue_stats WHERE queue = ?")
            .bind(queue)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| stats_from_row(&r)).transpose()
    }

    pub async fn get_all_stats(&self) -> Result<Vec<QueueStatsRow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM queue_stats ORDER BY queue")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(stats_from_row).collect()
    }

    /// Metrics history for one job, newest first.
    pub async fn metrics_history(
        &self,
        job_id: &JobId,
        limit: i64,
    ) -> Result<Vec<MetricsSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM job_metrics_history
             WHERE job_id = ? ORDER BY recorded_at DESC LIMIT ?",
        )
        .bind(job_id.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(MetricsSample {
                    job_id: JobId::from_string(row.try_get::<String, _>("job_id")?),
                    queue: row.try_get("queue")?,
                    job_type: row.try_get("job_type")?,
                    wait_ms: row.try_get("wait_ms")?,
                    processing_ms: row.try_get("processing_ms")?,
                    total_ms: row.try_get("total_ms")?,
                    retry_count: row.try_get::<i64, _>("retry_count")? as u32,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}

fn stats_from_row(row: &SqliteRow) -> Result<QueueStatsRow, StoreError> {
    Ok(QueueStatsRow {
        queue: row.try_get("queue")?,
        pending: row.try_get("pending")?,
        scheduled: row.try_get("scheduled")?,
        processing: row.try_get("processing")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        dead_letter: row.try_get("dead_letter")?,
        avg_wait_ms: row.try_get("avg_wait_ms")?,
        avg_processing_ms: row.try_get("avg_processing_ms")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
