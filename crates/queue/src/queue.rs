// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue façade consumed by collaborators.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use rq_core::{
    Clock, DlqId, Event, EventKind, Job, JobId, JobStatus, Priority, SystemClock, WorkerId,
};
use rq_store::{DeadLetterJob, MetricsSample, NewJob, QueueStatsRow, Store};

use crate::bus::EventBus;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::handler::{Handler, HandlerRegistry};
use crate::worker::WorkerHandles;

/// Per-enqueue options. Unset fields fall back to queue defaults.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Overrides `QueueConfig::max_attempts` when set. Must be >= 1.
    pub max_attempts: Option<u32>,
    pub idempotency_key: Option<String>,
    pub delay_ms: i64,
    /// Ordered step names; empty means the single step `execute`.
    pub steps: Vec<String>,
    pub tags: Vec<String>,
    /// Per-job lease length override.
    pub timeout_ms: Option<i64>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    rq_core::setters! {
        set {
            priority: Priority,
            delay_ms: i64,
            steps: Vec<String>,
            tags: Vec<String>,
        }
        option {
            max_attempts: u32,
            idempotency_key: String,
            timeout_ms: i64,
        }
    }
}

/// One entry of an [`Queue::enqueue_batch`] call.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue: String,
    pub job_type: String,
    pub payload: Value,
    pub options: EnqueueOptions,
}

impl EnqueueRequest {
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Self {
        Self { queue: queue.into(), job_type: job_type.into(), payload, options }
    }
}

pub(crate) struct QueueInner<C: Clock> {
    pub(crate) store: Store,
    pub(crate) config: QueueConfig,
    pub(crate) registry: HandlerRegistry,
    pub(crate) bus: EventBus,
    pub(crate) clock: C,
    pub(crate) worker_id: WorkerId,
    pub(crate) handles: Mutex<Option<WorkerHandles>>,
}

/// The durable queue. Cheap to clone; all clones share one store, handler
/// registry, event bus, and worker pool.
pub struct Queue<C: Clock = SystemClock> {
    pub(crate) inner: Arc<QueueInner<C>>,
}

impl<C: Clock> Clone for Queue<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Queue<SystemClock> {
    pub fn new(store: Store, config: QueueConfig) -> Result<Self, QueueError> {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<C: Clock> Queue<C> {
    /// Build a queue over `store` with an explicit clock (tests drive time
    /// through [`rq_core::FakeClock`]).
    pub fn with_clock(store: Store, config: QueueConfig, clock: C) -> Result<Self, QueueError> {
        config.validate()?;
        let worker_id = config.worker_id.clone().unwrap_or_else(WorkerId::random);
        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                config,
                registry: HandlerRegistry::default(),
                bus: EventBus::new(),
                clock,
                worker_id,
                handles: Mutex::new(None),
            }),
        })
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.inner.worker_id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// The queue's clock, shared so collaborators timestamp consistently.
    pub fn clock(&self) -> C {
        self.inner.clock.clone()
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.inner.clock.epoch_ms()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.inner.bus.emit(&event);
    }

    /// Register (or overwrite) the handler for a job type.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: impl Handler) {
        self.inner.registry.register(job_type, Arc::new(handler));
    }

    /// Register a pre-shared handler for a job type.
    pub fn register_handler_arc(&self, job_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.inner.registry.register(job_type, handler);
    }

    /// Subscribe to one lifecycle event kind.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.inner.bus.subscribe(kind, listener);
    }

    /// Subscribe to every lifecycle event.
    pub fn on_all(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.inner.bus.subscribe_all(listener);
    }

    /// Persist a job. An idempotency-key collision is not an error: the
    /// existing job is returned and `job:deduplicated` is emitted.
    pub async fn enqueue(
        &self,
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Job, QueueError> {
        let new = self.build_new_job(queue.into(), job_type.into(), payload, options)?;
        let outcome = self.inner.store.insert_job(new).await?;
        Ok(self.settle_insert(outcome))
    }

    /// Enqueue several jobs in one transaction; any failure rolls back the
    /// whole batch.
    pub async fn enqueue_batch(
        &self,
        requests: Vec<EnqueueRequest>,
    ) -> Result<Vec<Job>, QueueError> {
        let mut batch = Vec::with_capacity(requests.len());
        for request in requests {
            batch.push(self.build_new_job(
                request.queue,
                request.job_type,
                request.payload,
                request.options,
            )?);
        }
        let outcomes = self.inner.store.insert_batch(batch).await?;

        let mut jobs = Vec::with_capacity(outcomes.len());
        let mut created_ids = Vec::new();
        for outcome in outcomes {
            let deduplicated = outcome.is_deduplicated();
            let job = self.settle_insert(outcome);
            if !deduplicated {
                created_ids.push(job.id);
            }
            jobs.push(job);
        }
        if let Some(first) = jobs.first() {
            self.emit(Event::JobBatchCreated {
                queue: first.queue.clone(),
                count: jobs.len(),
                job_ids: created_ids,
            });
        }
        Ok(jobs)
    }

    fn build_new_job(
        &self,
        queue: String,
        job_type: String,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<NewJob, QueueError> {
        if queue.is_empty() {
            return Err(QueueError::Invalid("queue name must be non-empty".into()));
        }
        if job_type.is_empty() {
            return Err(QueueError::Invalid("job type must be non-empty".into()));
        }
        if options.delay_ms < 0 {
            return Err(QueueError::Invalid("delay_ms must be >= 0".into()));
        }
        let max_attempts = options.max_attempts.unwrap_or(self.inner.config.max_attempts);
        if max_attempts < 1 {
            return Err(QueueError::Invalid("max_attempts must be >= 1".into()));
        }
        let steps = if options.steps.is_empty() {
            vec!["execute".to_string()]
        } else {
            options.steps
        };
        let now = self.now_ms();
        Ok(NewJob {
            id: JobId::new(),
            queue,
            job_type,
            payload,
            priority: options.priority,
            max_attempts,
            idempotency_key: options.idempotency_key,
            steps,
            tags: options.tags,
            scheduled_at: now + options.delay_ms,
            timeout_ms: options.timeout_ms,
            created_at: now,
        })
    }

    fn settle_insert(&self, outcome: rq_store::InsertOutcome) -> Job {
        match outcome {
            rq_store::InsertOutcome::Inserted(job) => {
                self.emit(Event::JobCreated {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    job_type: job.job_type.clone(),
                    priority: job.priority,
                    scheduled_at: job.scheduled_at,
                });
                job
            }
            rq_store::InsertOutcome::Deduplicated(job) => {
                self.emit(Event::JobDeduplicated {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    idempotency_key: job.idempotency_key.clone().unwrap_or_default(),
                });
                job
            }
        }
    }

    /// Claim the next eligible job for this queue's worker identity.
    ///
    /// Returns `None` when nothing is eligible or a racing claimer won.
    pub async fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let now = self.now_ms();
        Ok(self
            .inner
            .store
            .claim_next(&self.inner.worker_id, now, self.inner.config.job_timeout_ms)
            .await?)
    }

    /// Conditionally cancel a pending or scheduled job. In-flight handlers
    /// are never interrupted; a processing job is left alone.
    pub async fn cancel_job(&self, id: &JobId) -> Result<bool, QueueError> {
        match self.inner.store.cancel_job(id, self.now_ms()).await? {
            Some(job) => {
                self.emit(Event::JobCancelled { job_id: job.id, queue: job.queue });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.store.get_job(id).await?)
    }

    pub async fn get_job_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.store.get_job_by_idempotency_key(key).await?)
    }

    /// Recent jobs for operator tooling.
    pub async fn list_jobs(
        &self,
        queue: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>, QueueError> {
        Ok(self.inner.store.list_jobs(queue, status, limit).await?)
    }

    pub async fn get_queue_stats(&self, queue: &str) -> Result<Option<QueueStatsRow>, QueueError> {
        Ok(self.inner.store.get_queue_stats(queue).await?)
    }

    pub async fn get_all_stats(&self) -> Result<Vec<QueueStatsRow>, QueueError> {
        Ok(self.inner.store.get_all_stats().await?)
    }

    pub async fn get_dead_letter_jobs(
        &self,
        queue: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeadLetterJob>, QueueError> {
        Ok(self.inner.store.list_dead_letters(queue, limit).await?)
    }

    pub async fn get_stalled_jobs_count(&self) -> Result<i64, QueueError> {
        Ok(self.inner.store.count_stalled(self.now_ms()).await?)
    }

    pub async fn metrics_history(
        &self,
        job_id: &JobId,
        limit: i64,
    ) -> Result<Vec<MetricsSample>, QueueError> {
        Ok(self.inner.store.metrics_history(job_id, limit).await?)
    }

    /// Re-enqueue a dead-lettered job as a brand-new job with default retry
    /// config, then delete the DLQ record. The original `dead_letter` job
    /// row remains as an audit trail.
    pub async fn retry_dead_letter(&self, dlq_id: &DlqId) -> Result<Job, QueueError> {
        let dlq = self
            .inner
            .store
            .get_dead_letter(dlq_id)
            .await?
            .ok_or(QueueError::DlqNotFound(*dlq_id))?;

        // Reuse the original job's step names so multi-step jobs keep their
        // shape; everything else starts fresh.
        let steps = match self.inner.store.get_job(&dlq.original_job_id).await? {
            Some(original) => original.steps.iter().map(|s| s.name.clone()).collect(),
            None => Vec::new(),
        };

        let options = EnqueueOptions { steps, tags: dlq.tags.clone(), ..Default::default() };
        let job = self
            .enqueue(dlq.queue.clone(), dlq.job_type.clone(), dlq.payload.clone(), options)
            .await?;
        self.inner.store.delete_dead_letter(dlq_id).await?;
        Ok(job)
    }

    /// Read one step-state value.
    pub async fn get_step_state(
        &self,
        job_id: &JobId,
        key: &str,
    ) -> Result<Option<Value>, QueueError> {
        Ok(self.inner.store.get_step_state(job_id, key).await?)
    }

    /// Write one step-state value; the write is the commit point.
    pub async fn update_step_state(
        &self,
        job_id: &JobId,
        key: &str,
        value: Value,
    ) -> Result<(), QueueError> {
        self.inner
            .store
            .update_step_state(job_id, key, value, self.now_ms())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
