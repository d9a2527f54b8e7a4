// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Automation runner: definitions, triggers, composite execution.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rq_core::{Clock, Event, EventKind, Job, JobId, Priority, SystemClock};
use rq_queue::{EnqueueOptions, Handler, HandlerError, Queue, StepContext};

use crate::model::{
    Action, Automation, AutomationId, Execution, ExecutionId, ExecutionStatus, NewAutomation,
    StepResult, StepResultStatus,
};
use crate::template;
use crate::AutomationError;

/// Bounds for the in-memory execution map.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_executions: usize,
    pub ttl_ms: i64,
    pub cleanup_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_executions: 10_000,
            ttl_ms: 24 * 60 * 60 * 1000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl RunnerConfig {
    rq_core::setters! {
        set {
            max_executions: usize,
            ttl_ms: i64,
            cleanup_interval_ms: u64,
        }
    }
}

/// Per-trigger options.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    /// Overrides the canonical `{automation_id}:{now_unix}` composite key.
    pub idempotency_key: Option<String>,
}

impl TriggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    rq_core::setters! {
        option {
            idempotency_key: String,
        }
    }
}

/// Result of a trigger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
}

/// Insertion-ordered execution map with a size cap; TTL eviction runs on
/// the cleanup interval.
#[derive(Default)]
struct ExecutionMap {
    entries: HashMap<ExecutionId, Execution>,
    order: VecDeque<ExecutionId>,
}

impl ExecutionMap {
    /// Insert, evicting the oldest entries beyond `max`. Returns the ids
    /// evicted so callers can drop side tables.
    fn insert(&mut self, execution: Execution, max: usize) -> Vec<ExecutionId> {
        self.order.push_back(execution.id);
        self.entries.insert(execution.id, execution);
        let mut evicted = Vec::new();
        while self.entries.len() > max {
            let Some(oldest) = self.order.pop_front() else { break };
            if self.entries.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    fn evict_expired(&mut self, now_ms: i64, ttl_ms: i64) -> Vec<ExecutionId> {
        let expired: Vec<ExecutionId> = self
            .entries
            .values()
            .filter(|e| e.started_at + ttl_ms <= now_ms)
            .map(|e| e.id)
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        self.order.retain(|id| self.entries.contains_key(id));
        expired
    }
}

struct RunnerInner<C: Clock> {
    queue: Queue<C>,
    config: RunnerConfig,
    clock: C,
    automations: RwLock<HashMap<AutomationId, Automation>>,
    executions: RwLock<ExecutionMap>,
    /// Composite job id → execution, for failure bookkeeping off the bus.
    jobs: RwLock<HashMap<JobId, ExecutionId>>,
    cleanup: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Owns automation definitions and converts triggers into queue jobs.
///
/// A client of the queue: it registers the `automation` composite handler
/// and observes queue events to keep its in-memory execution records
/// current. Cheap to clone.
pub struct AutomationRunner<C: Clock = SystemClock> {
    inner: Arc<RunnerInner<C>>,
}

impl<C: Clock> Clone for AutomationRunner<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> AutomationRunner<C> {
    /// Build a runner over `queue`, registering the `automation` handler
    /// and the dead-letter listener.
    pub fn new(queue: Queue<C>, config: RunnerConfig) -> Self {
        let clock = queue.clock();
        let inner = Arc::new(RunnerInner {
            queue: queue.clone(),
            config,
            clock,
            automations: RwLock::new(HashMap::new()),
            executions: RwLock::new(ExecutionMap::default()),
            jobs: RwLock::new(HashMap::new()),
            cleanup: Mutex::new(None),
        });

        queue.register_handler("automation", CompositeHandler { inner: Arc::downgrade(&inner) });

        // A composite that exhausts its retries fails its execution.
        let weak = Arc::downgrade(&inner);
        queue.on(EventKind::JobDeadLetter, move |event| {
            let Event::JobDeadLetter { job_id, error, .. } = event else { return };
            let Some(inner) = weak.upgrade() else { return };
            inner.fail_execution_for_job(job_id, error);
        });

        Self { inner }
    }

    /// Spawn the TTL cleanup task. Idempotent while running.
    pub fn start(&self) {
        let mut cleanup = self.inner.cleanup.lock();
        if cleanup.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let inner = Arc::downgrade(&self.inner);
        let token = cancel.clone();
        let interval = Duration::from_millis(self.inner.config.cleanup_interval_ms);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(inner) = inner.upgrade() else { return };
                inner.evict_expired();
            }
        });
        *cleanup = Some((cancel, task));
    }

    pub async fn stop(&self) {
        let handle = self.inner.cleanup.lock().take();
        if let Some((cancel, task)) = handle {
            cancel.cancel();
            let _ = task.await;
        }
    }

    pub fn create_automation(&self, new: NewAutomation) -> Result<Automation, AutomationError> {
        new.validate()?;
        let now = self.inner.clock.epoch_ms();
        let automation = Automation {
            id: AutomationId::new(),
            project_id: new.project_id,
            name: new.name,
            enabled: new.enabled,
            trigger: new.trigger,
            actions: new.actions,
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
            trigger_count: 0,
        };
        self.inner
            .automations
            .write()
            .insert(automation.id, automation.clone());
        Ok(automation)
    }

    pub fn get_automation(&self, id: &AutomationId) -> Option<Automation> {
        self.inner.automations.read().get(id).cloned()
    }

    /// All automations, optionally scoped to one project.
    pub fn list_automations(&self, project_id: Option<&str>) -> Vec<Automation> {
        let mut all: Vec<Automation> = self
            .inner
            .automations
            .read()
            .values()
            .filter(|a| project_id.map_or(true, |p| a.project_id == p))
            .cloned()
            .collect();
        all.sort_by_key(|a| a.created_at);
        all
    }

    /// Replace the definition fields of an automation; id, creation time,
    /// and trigger statistics are preserved.
    pub fn update_automation(
        &self,
        id: &AutomationId,
        new: NewAutomation,
    ) -> Result<Automation, AutomationError> {
        new.validate()?;
        let mut automations = self.inner.automations.write();
        let automation = automations.get_mut(id).ok_or(AutomationError::NotFound(*id))?;
        automation.project_id = new.project_id;
        automation.name = new.name;
        automation.trigger = new.trigger;
        automation.actions = new.actions;
        automation.enabled = new.enabled;
        automation.updated_at = self.inner.clock.epoch_ms();
        Ok(automation.clone())
    }

    pub fn set_enabled(
        &self,
        id: &AutomationId,
        enabled: bool,
    ) -> Result<Automation, AutomationError> {
        let mut automations = self.inner.automations.write();
        let automation = automations.get_mut(id).ok_or(AutomationError::NotFound(*id))?;
        automation.enabled = enabled;
        automation.updated_at = self.inner.clock.epoch_ms();
        Ok(automation.clone())
    }

    pub fn delete_automation(&self, id: &AutomationId) -> bool {
        self.inner.automations.write().remove(id).is_some()
    }

    /// Trigger an automation: record a running execution and submit the
    /// composite job. Manual calls, the external cron engine, and the
    /// asset-upload hook all enter here.
    pub async fn trigger(
        &self,
        id: &AutomationId,
        trigger_payload: Value,
        options: TriggerOptions,
    ) -> Result<TriggerOutcome, AutomationError> {
        let now = self.inner.clock.epoch_ms();
        let automation = {
            let mut automations = self.inner.automations.write();
            let automation = automations.get_mut(id).ok_or(AutomationError::NotFound(*id))?;
            if !automation.enabled {
                return Err(AutomationError::Disabled(*id));
            }
            automation.last_triggered_at = Some(now);
            automation.trigger_count += 1;
            automation.clone()
        };

        let execution_id = ExecutionId::new();
        let execution = Execution {
            id: execution_id,
            automation_id: automation.id,
            trigger_payload: trigger_payload.clone(),
            status: ExecutionStatus::Running,
            current_step: 0,
            results: Vec::new(),
            error: None,
            started_at: now,
            finished_at: None,
        };
        self.inner.insert_execution(execution);

        let idempotency_key = options
            .idempotency_key
            .unwrap_or_else(|| format!("{}:{}", automation.id, now / 1000));
        let payload = json!({
            "automation_id": automation.id,
            "execution_id": execution_id,
            "trigger_payload": trigger_payload,
        });
        let enqueued = self
            .inner
            .queue
            .enqueue(
                "automations",
                "automation",
                payload,
                EnqueueOptions::new()
                    .priority(Priority::High)
                    .steps(vec![
                        "validate".to_string(),
                        "execute_actions".to_string(),
                        "cleanup".to_string(),
                    ])
                    .idempotency_key(idempotency_key),
            )
            .await;
        let job = match enqueued {
            Ok(job) => job,
            Err(err) => {
                self.inner.drop_execution(&execution_id);
                return Err(err.into());
            }
        };

        // The composite key may have collided with an earlier trigger; in
        // that case the returned job belongs to the earlier execution and
        // the record just created is dropped.
        let actual = job
            .payload
            .get("execution_id")
            .and_then(Value::as_str)
            .map(ExecutionId::from_string)
            .unwrap_or(execution_id);
        if actual != execution_id {
            self.inner.drop_execution(&execution_id);
        }
        self.inner.jobs.write().insert(job.id, actual);

        Ok(TriggerOutcome { execution_id: actual, job_id: job.id })
    }

    pub fn get_execution(&self, id: &ExecutionId) -> Option<Execution> {
        self.inner.executions.read().entries.get(id).cloned()
    }

    pub fn get_executions_by_automation(&self, id: &AutomationId) -> Vec<Execution> {
        let executions = self.inner.executions.read();
        executions
            .order
            .iter()
            .filter_map(|eid| executions.entries.get(eid))
            .filter(|e| e.automation_id == *id)
            .cloned()
            .collect()
    }

    /// Most recent executions first.
    pub fn get_recent_executions(&self, limit: usize) -> Vec<Execution> {
        let executions = self.inner.executions.read();
        executions
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|eid| executions.entries.get(eid))
            .cloned()
            .collect()
    }
}

impl<C: Clock> RunnerInner<C> {
    fn insert_execution(&self, execution: Execution) {
        let evicted = self
            .executions
            .write()
            .insert(execution, self.config.max_executions);
        if !evicted.is_empty() {
            self.prune_jobs(&evicted);
        }
    }

    fn evict_expired(&self) {
        let now = self.clock.epoch_ms();
        let evicted = self.executions.write().evict_expired(now, self.config.ttl_ms);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted expired executions");
            self.prune_jobs(&evicted);
        }
    }

    fn prune_jobs(&self, evicted: &[ExecutionId]) {
        let mut jobs = self.jobs.write();
        jobs.retain(|_, exec_id| !evicted.contains(exec_id));
    }

    fn drop_execution(&self, id: &ExecutionId) {
        let mut executions = self.executions.write();
        executions.entries.remove(id);
        executions.order.retain(|eid| eid != id);
    }

    fn with_execution(&self, id: &ExecutionId, f: impl FnOnce(&mut Execution)) {
        if let Some(execution) = self.executions.write().entries.get_mut(id) {
            f(execution);
        }
    }

    fn fail_execution_for_job(&self, job_id: &JobId, error: &str) {
        let exec_id = self.jobs.read().get(job_id).copied();
        let Some(exec_id) = exec_id else { return };
        let now = self.clock.epoch_ms();
        self.with_execution(&exec_id, |execution| {
            execution.status = ExecutionStatus::Failed;
            execution.error = Some(error.to_string());
            execution.finished_at = Some(now);
        });
    }
}

/// Composite job payload, written at trigger time.
#[derive(Debug, Deserialize)]
struct CompositePayload {
    automation_id: AutomationId,
    execution_id: ExecutionId,
    #[serde(default)]
    trigger_payload: Value,
}

/// Handler for `automation` jobs; drives the validate / execute_actions /
/// cleanup steps of the composite.
struct CompositeHandler<C: Clock> {
    inner: Weak<RunnerInner<C>>,
}

#[async_trait::async_trait]
impl<C: Clock> Handler for CompositeHandler<C> {
    async fn run(
        &self,
        job: &Job,
        step: &str,
        _ctx: &StepContext,
    ) -> Result<Option<Value>, HandlerError> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(HandlerError::new("automation runner is gone"));
        };
        let payload: CompositePayload = serde_json::from_value(job.payload.clone())
            .map_err(|err| HandlerError::new(format!("malformed automation payload: {err}")))?;

        match step {
            "validate" => inner.step_validate(&payload),
            "execute_actions" => inner.step_execute_actions(&payload).await,
            "cleanup" => inner.step_cleanup(&payload),
            other => Err(HandlerError::new(format!("unknown automation step: {other}"))),
        }
    }
}

impl<C: Clock> RunnerInner<C> {
    fn step_validate(&self, payload: &CompositePayload) -> Result<Option<Value>, HandlerError> {
        let automations = self.automations.read();
        let Some(automation) = automations.get(&payload.automation_id) else {
            return Err(HandlerError::new(format!(
                "automation not found: {}",
                payload.automation_id
            )));
        };
        if !automation.enabled {
            return Err(HandlerError::new(format!(
                "automation is disabled: {}",
                payload.automation_id
            )));
        }
        Ok(None)
    }

    async fn step_execute_actions(
        &self,
        payload: &CompositePayload,
    ) -> Result<Option<Value>, HandlerError> {
        let automation = self
            .automations
            .read()
            .get(&payload.automation_id)
            .cloned()
            .ok_or_else(|| {
                HandlerError::new(format!("automation not found: {}", payload.automation_id))
            })?;

        // A retried composite re-runs the whole action list; start the
        // bookkeeping over. Children dedup on their idempotency keys.
        self.with_execution(&payload.execution_id, |execution| {
            execution.results.clear();
            execution.current_step = 0;
        });

        for (index, action) in automation.actions.iter().enumerate() {
            let started = self.clock.epoch_ms();
            let (queue_name, child_payload) = render_action(action, &payload.trigger_payload);
            let child_key = format!("{}:{}", payload.execution_id, index);

            let enqueued = self
                .queue
                .enqueue(
                    queue_name,
                    action.job_type(),
                    child_payload,
                    EnqueueOptions::new().idempotency_key(child_key),
                )
                .await;
            let duration_ms = self.clock.epoch_ms() - started;

            match enqueued {
                Ok(child) => {
                    let result = StepResult {
                        index,
                        action: action.job_type().to_string(),
                        status: StepResultStatus::Success,
                        output: Some(json!({ "job_id": child.id })),
                        error: None,
                        duration_ms,
                    };
                    self.with_execution(&payload.execution_id, |execution| {
                        execution.results.push(result.clone());
                        execution.current_step = index + 1;
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    let result = StepResult {
                        index,
                        action: action.job_type().to_string(),
                        status: StepResultStatus::Failed,
                        output: None,
                        error: Some(message.clone()),
                        duration_ms,
                    };
                    self.with_execution(&payload.execution_id, |execution| {
                        execution.results.push(result.clone());
                        execution.error = Some(message.clone());
                    });
                    // Bubbles to queue-level retry of the whole composite.
                    return Err(HandlerError::new(format!(
                        "action {index} ({}) failed: {message}",
                        action.job_type()
                    )));
                }
            }
        }

        Ok(Some(json!({ "actions_enqueued": automation.actions.len() })))
    }

    fn step_cleanup(&self, payload: &CompositePayload) -> Result<Option<Value>, HandlerError> {
        let now = self.clock.epoch_ms();
        self.with_execution(&payload.execution_id, |execution| {
            execution.status = ExecutionStatus::Completed;
            execution.finished_at = Some(now);
        });
        Ok(None)
    }
}

/// Materialize the child job payload for one action.
fn render_action(action: &Action, trigger_payload: &Value) -> (&'static str, Value) {
    match action {
        Action::Render { composition_id, input_props_template, output_overrides } => {
            let mut payload = json!({
                "composition_id": composition_id,
                "input_props": template::interpolate(input_props_template, trigger_payload),
            });
            if let Some(overrides) = output_overrides {
                payload["output_overrides"] = overrides.clone();
            }
            ("renders", payload)
        }
        Action::Notify { channel, target, template: message } => {
            let message = message
                .as_deref()
                .map(|m| template::interpolate_str(m, trigger_payload));
            (
                "notifications",
                json!({
                    "channel": channel,
                    "target": target,
                    "message": message,
                }),
            )
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
