// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity and step state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::WorkerId;

crate::define_id! {
    /// Unique identifier for a job.
    pub struct JobId("job_");
}

crate::define_id! {
    /// Unique identifier for a dead-letter record.
    pub struct DlqId("dlq_");
}

/// Persistent status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for claim as soon as `scheduled_at` passes.
    Pending,
    /// Created with a delay; becomes claimable when `scheduled_at` passes.
    Scheduled,
    /// Leased by a worker until `timeout_at`.
    Processing,
    /// Terminal success.
    Completed,
    /// Failed without dead-letter routing. Part of the status vocabulary
    /// and counted in stats, but the retry pipeline routes exhausted jobs
    /// to `DeadLetter` instead.
    Failed,
    /// Terminal, caller-requested.
    Cancelled,
    /// Terminal, retries exhausted; audit row kept after DLQ promotion.
    DeadLetter,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Scheduled => "scheduled",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        DeadLetter => "dead_letter",
    }
}

impl JobStatus {
    /// Parse a status stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "dead_letter" => Some(Self::DeadLetter),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::DeadLetter)
    }

    /// States a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }
}

/// Claim priority. Smaller rank is claimed first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

crate::simple_display! {
    Priority {
        Urgent => "urgent",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
}

impl Priority {
    /// Claim-order rank persisted in the store.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Inverse of [`Priority::rank`]; unknown ranks map to `Normal`.
    pub fn from_rank(rank: i64) -> Self {
        match rank {
            0 => Self::Urgent,
            1 => Self::High,
            3 => Self::Low,
            _ => Self::Normal,
        }
    }
}

/// Status of a single step within a job.
///
/// Advances `pending → running → {completed, failed, skipped}`. A step may
/// return to `running` on a later attempt; `started_at_ms` is updated then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

crate::simple_display! {
    StepStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

/// Record of one named step in a job's ordered sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl StepRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            started_at_ms: None,
            completed_at_ms: None,
            output: None,
            error: None,
            duration_ms: None,
        }
    }

    /// Mark the step running. Re-entry on a later attempt refreshes
    /// `started_at_ms` and clears the previous failure.
    pub fn start(&mut self, now_ms: i64) {
        self.status = StepStatus::Running;
        self.started_at_ms = Some(now_ms);
        self.completed_at_ms = None;
        self.error = None;
        self.duration_ms = None;
    }

    /// Mark the step completed, recording output and duration.
    pub fn complete(&mut self, now_ms: i64, output: Option<Value>) {
        self.status = StepStatus::Completed;
        self.completed_at_ms = Some(now_ms);
        self.output = output;
        self.duration_ms = self.started_at_ms.map(|s| now_ms.saturating_sub(s));
    }

    /// Mark the step failed, capturing the error verbatim.
    pub fn fail(&mut self, now_ms: i64, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at_ms = Some(now_ms);
        self.error = Some(error.into());
        self.duration_ms = self.started_at_ms.map(|s| now_ms.saturating_sub(s));
    }

    /// Steps already completed or skipped are not re-run on retry.
    pub fn is_done(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Timing snapshot, updated at claim and completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Claim time − creation time.
    #[serde(default)]
    pub wait_ms: i64,
    /// Completion time − last claim time.
    #[serde(default)]
    pub processing_ms: i64,
    /// Completion time − creation time.
    #[serde(default)]
    pub total_ms: i64,
    /// Total attempts made, including the first. Stays zero for jobs that
    /// never had a failed attempt.
    #[serde(default)]
    pub retry_count: u32,
}

/// A persisted job. Field semantics follow the store schema; timestamps are
/// epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Logical partition name.
    pub queue: String,
    /// Selects the registered handler.
    pub job_type: String,
    /// Opaque enqueuer-supplied value, persisted verbatim.
    pub payload: Value,
    pub status: JobStatus,
    pub priority: Priority,
    /// Claim attempts, incremented atomically at claim time.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Ordered step sequence; resumption skips records that are done.
    pub steps: Vec<StepRecord>,
    /// Scratchpad preserved across attempts; flushed per update.
    #[serde(default)]
    pub step_state: serde_json::Map<String, Value>,
    /// Last failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: JobMetrics,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Earliest claim eligibility.
    pub scheduled_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Lease deadline; past this the stalled scan recovers the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<i64>,
    /// Current lease holder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Index of the first step that still needs work this attempt.
    pub fn next_step_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_done())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Look up a step-state value by key.
    pub fn state_value(&self, key: &str) -> Option<&Value> {
        self.step_state.get(key)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
