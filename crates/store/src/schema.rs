// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Table and index definitions.
//!
//! JSON-bearing columns (`payload`, `steps`, `step_state`, `metrics`, `tags`)
//! hold serialized structured data; readers tolerate additive fields.

use sqlx::sqlite::SqlitePool;

use crate::error::StoreError;

const DDL: &[&str] = &[
    // Priority is stored as its claim rank (0 = urgent .. 3 = low) so the
    // claim ORDER BY needs no mapping table.
    "CREATE TABLE IF NOT EXISTS jobs (
        id              TEXT PRIMARY KEY,
        queue           TEXT NOT NULL,
        job_type        TEXT NOT NULL,
        payload         TEXT NOT NULL,
        status          TEXT NOT NULL,
        priority        INTEGER NOT NULL DEFAULT 2,
        attempts        INTEGER NOT NULL DEFAULT 0,
        max_attempts    INTEGER NOT NULL DEFAULT 3,
        idempotency_key TEXT,
        steps           TEXT NOT NULL DEFAULT '[]',
        step_state      TEXT NOT NULL DEFAULT '{}',
        error           TEXT,
        metrics         TEXT NOT NULL DEFAULT '{}',
        tags            TEXT NOT NULL DEFAULT '[]',
        scheduled_at    INTEGER NOT NULL,
        started_at      INTEGER,
        completed_at    INTEGER,
        timeout_at      INTEGER,
        timeout_ms      INTEGER,
        worker_id       TEXT,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_idempotency
        ON jobs (idempotency_key) WHERE idempotency_key IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_jobs_queue_status
        ON jobs (queue, status, priority)",
    // Claim scan: eligible rows in claim order.
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim
        ON jobs (status, scheduled_at) WHERE status IN ('pending', 'scheduled')",
    // Stalled scan: expired leases only.
    "CREATE INDEX IF NOT EXISTS idx_jobs_stalled
        ON jobs (status, timeout_at) WHERE status = 'processing'",
    "CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs (worker_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs (created_at DESC)",
    "CREATE TABLE IF NOT EXISTS dead_letter_jobs (
        id              TEXT PRIMARY KEY,
        original_job_id TEXT NOT NULL REFERENCES jobs (id),
        queue           TEXT NOT NULL,
        job_type        TEXT NOT NULL,
        payload         TEXT NOT NULL,
        error           TEXT NOT NULL,
        attempts        INTEGER NOT NULL,
        step_state      TEXT NOT NULL DEFAULT '{}',
        metrics         TEXT NOT NULL DEFAULT '{}',
        tags            TEXT NOT NULL DEFAULT '[]',
        moved_at        INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_dlq_queue
        ON dead_letter_jobs (queue, moved_at DESC)",
    "CREATE TABLE IF NOT EXISTS queue_stats (
        queue             TEXT PRIMARY KEY,
        pending           INTEGER NOT NULL DEFAULT 0,
        scheduled         INTEGER NOT NULL DEFAULT 0,
        processing        INTEGER NOT NULL DEFAULT 0,
        completed         INTEGER NOT NULL DEFAULT 0,
        failed            INTEGER NOT NULL DEFAULT 0,
        dead_letter       INTEGER NOT NULL DEFAULT 0,
        avg_wait_ms       REAL NOT NULL DEFAULT 0,
        avg_processing_ms REAL NOT NULL DEFAULT 0,
        updated_at        INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS job_metrics_history (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id        TEXT NOT NULL,
        queue         TEXT NOT NULL,
        job_type      TEXT NOT NULL,
        wait_ms       INTEGER NOT NULL,
        processing_ms INTEGER NOT NULL,
        total_ms      INTEGER NOT NULL,
        retry_count   INTEGER NOT NULL,
        recorded_at   INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_metrics_job ON job_metrics_history (job_id)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_queue ON job_metrics_history (queue)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_recorded
        ON job_metrics_history (recorded_at DESC)",
];

/// Apply the schema. Idempotent; safe to run at every open.
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = DDL.len(), "schema applied");
    Ok(())
}
