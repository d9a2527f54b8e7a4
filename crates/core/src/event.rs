// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events emitted by the queue and worker pool.

use serde::{Deserialize, Serialize};

use crate::id::WorkerId;
use crate::job::{DlqId, JobId, Priority};

/// Events fanned out to bus listeners at every state transition.
///
/// Serializes with `{"type": "job:created", ...fields}` format. Payloads are
/// flat records; every job event carries the job id plus relevant context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job:created")]
    JobCreated {
        job_id: JobId,
        queue: String,
        job_type: String,
        priority: Priority,
        scheduled_at: i64,
    },

    /// An enqueue collided with an existing idempotency key; the existing
    /// job was returned instead of creating a new row.
    #[serde(rename = "job:deduplicated")]
    JobDeduplicated {
        job_id: JobId,
        queue: String,
        idempotency_key: String,
    },

    #[serde(rename = "job:batch_created")]
    JobBatchCreated {
        queue: String,
        count: usize,
        job_ids: Vec<JobId>,
    },

    #[serde(rename = "job:started")]
    JobStarted {
        job_id: JobId,
        queue: String,
        job_type: String,
        worker_id: WorkerId,
        attempt: u32,
    },

    #[serde(rename = "job:completed")]
    JobCompleted {
        job_id: JobId,
        queue: String,
        processing_ms: i64,
        total_ms: i64,
        attempts: u32,
    },

    /// A failed attempt was rescheduled with backoff.
    #[serde(rename = "job:retrying")]
    JobRetrying {
        job_id: JobId,
        queue: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: i64,
        error: String,
    },

    /// A processing job's lease expired without completion.
    #[serde(rename = "job:stalled")]
    JobStalled {
        job_id: JobId,
        queue: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<WorkerId>,
        timeout_ms: i64,
    },

    #[serde(rename = "job:dead_letter")]
    JobDeadLetter {
        job_id: JobId,
        dlq_id: DlqId,
        queue: String,
        attempts: u32,
        error: String,
    },

    #[serde(rename = "job:cancelled")]
    JobCancelled { job_id: JobId, queue: String },

    /// A step failed; precedes the retry/dead-letter decision.
    #[serde(rename = "job:error")]
    JobError {
        job_id: JobId,
        queue: String,
        step: String,
        error: String,
    },

    #[serde(rename = "worker:started")]
    WorkerStarted { worker_id: WorkerId, concurrency: usize },

    #[serde(rename = "worker:stopped")]
    WorkerStopped { worker_id: WorkerId },
}

/// Tag-only discriminant used as the bus subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobDeduplicated,
    JobBatchCreated,
    JobStarted,
    JobCompleted,
    JobRetrying,
    JobStalled,
    JobDeadLetter,
    JobCancelled,
    JobError,
    WorkerStarted,
    WorkerStopped,
}

crate::simple_display! {
    EventKind {
        JobCreated => "job:created",
        JobDeduplicated => "job:deduplicated",
        JobBatchCreated => "job:batch_created",
        JobStarted => "job:started",
        JobCompleted => "job:completed",
        JobRetrying => "job:retrying",
        JobStalled => "job:stalled",
        JobDeadLetter => "job:dead_letter",
        JobCancelled => "job:cancelled",
        JobError => "job:error",
        WorkerStarted => "worker:started",
        WorkerStopped => "worker:stopped",
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JobCreated { .. } => EventKind::JobCreated,
            Event::JobDeduplicated { .. } => EventKind::JobDeduplicated,
            Event::JobBatchCreated { .. } => EventKind::JobBatchCreated,
            Event::JobStarted { .. } => EventKind::JobStarted,
            Event::JobCompleted { .. } => EventKind::JobCompleted,
            Event::JobRetrying { .. } => EventKind::JobRetrying,
            Event::JobStalled { .. } => EventKind::JobStalled,
            Event::JobDeadLetter { .. } => EventKind::JobDeadLetter,
            Event::JobCancelled { .. } => EventKind::JobCancelled,
            Event::JobError { .. } => EventKind::JobError,
            Event::WorkerStarted { .. } => EventKind::WorkerStarted,
            Event::WorkerStopped { .. } => EventKind::WorkerStopped,
        }
    }

    /// One-line summary for logs.
    pub fn log_summary(&self) -> String {
        let t = self.kind();
        match self {
            Event::JobCreated { job_id, queue, job_type, .. } => {
                format!("{t} id={job_id} queue={queue} type={job_type}")
            }
            Event::JobDeduplicated { job_id, idempotency_key, .. } => {
                format!("{t} id={job_id} key={idempotency_key}")
            }
            Event::JobBatchCreated { queue, count, .. } => {
                format!("{t} queue={queue} count={count}")
            }
            Event::JobStarted { job_id, worker_id, attempt, .. } => {
                format!("{t} id={job_id} worker={worker_id} attempt={attempt}")
            }
            Event::JobCompleted { job_id, processing_ms, .. } => {
                format!("{t} id={job_id} processing_ms={processing_ms}")
            }
            Event::JobRetrying { job_id, attempt, max_attempts, delay_ms, .. } => {
                format!("{t} id={job_id} attempt={attempt}/{max_attempts} delay_ms={delay_ms}")
            }
            Event::JobStalled { job_id, timeout_ms, .. } => {
                format!("{t} id={job_id} timeout_ms={timeout_ms}")
            }
            Event::JobDeadLetter { job_id, dlq_id, attempts, .. } => {
                format!("{t} id={job_id} dlq={dlq_id} attempts={attempts}")
            }
            Event::JobCancelled { job_id, .. } => format!("{t} id={job_id}"),
            Event::JobError { job_id, step, error, .. } => {
                format!("{t} id={job_id} step={step} error={error}")
            }
            Event::WorkerStarted { worker_id, concurrency } => {
                format!("{t} worker={worker_id} concurrency={concurrency}")
            }
            Event::WorkerStopped { worker_id } => format!("{t} worker={worker_id}"),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
