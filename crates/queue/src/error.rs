// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue error type.

use rq_core::{DlqId, JobId};
use rq_store::StoreError;

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration or enqueue request; surfaced immediately.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("dead-letter record not found: {0}")]
    DlqNotFound(DlqId),
}
