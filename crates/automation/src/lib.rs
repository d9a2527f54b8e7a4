// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rq-automation: declarative automations on top of the renderq queue.
//!
//! An automation binds a trigger (manual, scheduled, asset upload) to an
//! ordered list of actions. Triggering one materializes an in-memory
//! execution record and submits a single composite `automation` job; the
//! composite's handler enqueues the child render/notify jobs with
//! idempotent keys so a retried composite absorbs its own duplicates.

mod model;
mod runner;
mod template;

pub use model::{
    Action, Automation, AutomationId, Execution, ExecutionId, ExecutionStatus, NewAutomation,
    StepResult, StepResultStatus, Trigger,
};
pub use runner::{AutomationRunner, RunnerConfig, TriggerOptions, TriggerOutcome};
pub use template::interpolate;

/// Errors surfaced by the automation runner.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("automation not found: {0}")]
    NotFound(AutomationId),

    #[error("automation is disabled: {0}")]
    Disabled(AutomationId),

    #[error("invalid automation: {0}")]
    Invalid(String),

    #[error(transparent)]
    Queue(#[from] rq_queue::QueueError),
}
