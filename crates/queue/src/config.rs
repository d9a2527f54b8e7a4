// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue configuration.

use rq_core::WorkerId;

use crate::backoff::RetryPolicy;
use crate::error::QueueError;

/// Leases past their deadline by this much are recovered at worker start
/// regardless of which worker generation held them.
pub(crate) const STALE_LEASE_GRACE_MS: i64 = 5 * 60 * 1000;

/// Tuning knobs for the queue and its worker pool.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stable worker identity; pinned by operators who want same-identity
    /// crash recovery, randomized otherwise.
    pub worker_id: Option<WorkerId>,
    /// Default claim-attempt bound for enqueues that do not override it.
    pub max_attempts: u32,
    pub retry: RetryPolicy,
    /// Default lease length; per-job `timeout_ms` overrides it.
    pub job_timeout_ms: i64,
    pub stalled_check_interval_ms: u64,
    /// Max claims per poll tick.
    pub batch_size: usize,
    /// Concurrent processing slots.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub stats_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            max_attempts: 3,
            retry: RetryPolicy::default(),
            job_timeout_ms: 60_000,
            stalled_check_interval_ms: 30_000,
            batch_size: 10,
            concurrency: 4,
            poll_interval_ms: 500,
            stats_interval_ms: 60_000,
        }
    }
}

impl QueueConfig {
    rq_core::setters! {
        set {
            max_attempts: u32,
            retry: RetryPolicy,
            job_timeout_ms: i64,
            stalled_check_interval_ms: u64,
            batch_size: usize,
            concurrency: usize,
            poll_interval_ms: u64,
            stats_interval_ms: u64,
        }
        option {
            worker_id: WorkerId,
        }
    }

    /// Validate at queue construction; misconfiguration is a programmer
    /// error and surfaces immediately.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_attempts < 1 {
            return Err(QueueError::Invalid("max_attempts must be >= 1".into()));
        }
        if self.concurrency < 1 {
            return Err(QueueError::Invalid("concurrency must be >= 1".into()));
        }
        if self.batch_size < 1 {
            return Err(QueueError::Invalid("batch_size must be >= 1".into()));
        }
        if self.job_timeout_ms < 1 {
            return Err(QueueError::Invalid("job_timeout_ms must be >= 1".into()));
        }
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
