// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Automation, trigger, action, and execution types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AutomationError;

rq_core::define_id! {
    /// Unique identifier for an automation definition.
    pub struct AutomationId("auto_");
}

rq_core::define_id! {
    /// Unique identifier for one triggered execution.
    pub struct ExecutionId("exec_");
}

/// What fires an automation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fired by an external webhook delivery.
    Webhook,
    /// Fired on cue by an external cron engine; the runner only stores the
    /// schedule, it never ticks a clock itself.
    Schedule { cron: String, timezone: String },
    /// Fired when an asset of a matching type is uploaded.
    AssetUpload { types: Vec<String> },
}

impl Trigger {
    fn validate(&self) -> Result<(), AutomationError> {
        match self {
            Trigger::Webhook => Ok(()),
            Trigger::Schedule { cron, timezone } => {
                if cron.split_whitespace().count() != 5 {
                    return Err(AutomationError::Invalid(format!(
                        "cron expression must have 5 fields: {cron:?}"
                    )));
                }
                if timezone.is_empty() {
                    return Err(AutomationError::Invalid("timezone must be non-empty".into()));
                }
                Ok(())
            }
            Trigger::AssetUpload { types } => {
                if types.is_empty() {
                    return Err(AutomationError::Invalid(
                        "asset_upload trigger needs at least one type".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// One step of an automation's ordered action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Enqueue a render of a composition; the template is interpolated with
    /// the trigger payload to produce the job's input props.
    Render {
        composition_id: String,
        input_props_template: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_overrides: Option<Value>,
    },
    /// Enqueue a notification.
    Notify {
        channel: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
}

impl Action {
    /// Job type name of the child job this action enqueues.
    pub fn job_type(&self) -> &'static str {
        match self {
            Action::Render { .. } => "render",
            Action::Notify { .. } => "notify",
        }
    }

    fn validate(&self) -> Result<(), AutomationError> {
        match self {
            Action::Render { composition_id, .. } => {
                if composition_id.is_empty() {
                    return Err(AutomationError::Invalid(
                        "render action needs a composition_id".into(),
                    ));
                }
                Ok(())
            }
            Action::Notify { target, channel, .. } => {
                if target.is_empty() {
                    return Err(AutomationError::Invalid("notify action needs a target".into()));
                }
                if channel.is_empty() {
                    return Err(AutomationError::Invalid("notify action needs a channel".into()));
                }
                Ok(())
            }
        }
    }
}

/// Input for creating an automation.
#[derive(Debug, Clone)]
pub struct NewAutomation {
    pub project_id: String,
    pub name: String,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    pub enabled: bool,
}

impl NewAutomation {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            trigger,
            actions,
            enabled: true,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), AutomationError> {
        if self.name.is_empty() {
            return Err(AutomationError::Invalid("name must be non-empty".into()));
        }
        self.trigger.validate()?;
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

/// A stored automation definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: AutomationId,
    pub project_id: String,
    pub name: String,
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<i64>,
    #[serde(default)]
    pub trigger_count: u64,
}

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

rq_core::simple_display! {
    ExecutionStatus {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Outcome of one action within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Success,
    Failed,
}

/// Per-action result recorded while the composite job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    /// Action kind ("render" / "notify").
    pub action: String,
    pub status: StepResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Runtime record of one trigger. Observational and in-memory only; the
/// durable truth is the composite queue job and its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub automation_id: AutomationId,
    pub trigger_payload: Value,
    pub status: ExecutionStatus,
    /// Index of the next action to run.
    pub current_step: usize,
    pub results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
