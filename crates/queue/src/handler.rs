// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler contract and registry.
//!
//! A handler is bound to a job type name and invoked once per step. The
//! queue knows nothing about concrete types like `render` or `notify`;
//! collaborators register what they need.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use rq_core::{Job, JobId};
use rq_store::Store;

use crate::error::QueueError;

/// A step failure raised by a handler. The message is captured verbatim
/// into the step record and the job's `error` column.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

type NowFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Narrow per-job view handed to a handler invocation.
///
/// All handler state goes through the step-state accessors; handlers never
/// touch job rows directly. Each update is flushed immediately and survives
/// retries, so handlers store progress markers here and skip work already
/// done on a previous attempt.
#[derive(Clone)]
pub struct StepContext {
    store: Store,
    job_id: JobId,
    now_fn: NowFn,
}

impl StepContext {
    pub(crate) fn new(store: Store, job_id: JobId, now_fn: NowFn) -> Self {
        Self { store, job_id, now_fn }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Current time in epoch milliseconds, from the queue's clock.
    pub fn now_ms(&self) -> i64 {
        (self.now_fn)()
    }

    /// Persist one step-state key. The write is the commit point; a crash
    /// after this call leaves the value visible to the next attempt.
    pub async fn update_state(&self, key: &str, value: Value) -> Result<(), QueueError> {
        self.store
            .update_step_state(&self.job_id, key, value, self.now_ms())
            .await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<Value>, QueueError> {
        Ok(self.store.get_step_state(&self.job_id, key).await?)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext").field("job_id", &self.job_id).finish()
    }
}

/// Step executor bound to a job type.
///
/// Returning `Ok` marks the step completed (the value is recorded as step
/// output); returning `Err` marks it failed and routes the attempt through
/// retry/DLQ. Handlers may suspend on I/O — the concurrency slot stays
/// taken — and must tolerate re-invocation after retries or stalled-lease
/// recovery.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn run(
        &self,
        job: &Job,
        step: &str,
        ctx: &StepContext,
    ) -> Result<Option<Value>, HandlerError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Job, String, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Job, String, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    async fn run(
        &self,
        job: &Job,
        step: &str,
        ctx: &StepContext,
    ) -> Result<Option<Value>, HandlerError> {
        (self.f)(job.clone(), step.to_string(), ctx.clone()).await
    }
}

/// Job type name → handler. Registration overwrites silently so
/// collaborators can swap implementations at startup.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, job_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(job_type.into(), handler);
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(job_type).cloned()
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
