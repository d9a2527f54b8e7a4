// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error type.

use rq_core::JobId;

/// Errors surfaced by store operations.
///
/// Persistence failures propagate to the caller of the queue operation;
/// no partial state is left behind (single-statement or transactional writes).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt column {column} on job {job_id}: {source}")]
    Corrupt {
        job_id: JobId,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("dead-letter record not found: {0}")]
    DlqNotFound(String),

    /// An insert affected zero rows without an idempotency key to explain it.
    #[error("insert conflict on job {0}")]
    InsertConflict(JobId),

    /// Optimistic step-state update lost too many rounds in a row.
    #[error("step_state update contention on job {0}")]
    StateContention(JobId),
}
