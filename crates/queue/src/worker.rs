// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: claim loop, step processor, stalled-lease scan, stats loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use rq_core::{Clock, Event, Job, JobMetrics};

use crate::config::STALE_LEASE_GRACE_MS;
use crate::error::QueueError;
use crate::handler::{HandlerError, StepContext};
use crate::queue::Queue;

pub(crate) struct WorkerHandles {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Clock> Queue<C> {
    /// Start the worker pool, stalled-lease scan, and stats loop.
    ///
    /// Recovers leases first: jobs held by this worker identity from a
    /// previous process generation, plus leases stale past the cross-
    /// generation grace period. Idempotent while running.
    pub async fn start(&self) -> Result<(), QueueError> {
        if self.inner.handles.lock().is_some() {
            return Ok(());
        }

        let now = self.now_ms();
        let own = self
            .inner
            .store
            .recover_worker_jobs(&self.inner.worker_id, now)
            .await?;
        let stale = self
            .inner
            .store
            .recover_stale_leases(now, STALE_LEASE_GRACE_MS)
            .await?;
        if own > 0 || stale > 0 {
            tracing::info!(own, stale, "recovered orphaned leases at worker start");
        }

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(poll_loop(self.clone(), cancel.clone())),
            tokio::spawn(stalled_loop(self.clone(), cancel.clone())),
            tokio::spawn(stats_loop(self.clone(), cancel.clone())),
        ];
        {
            let mut handles = self.inner.handles.lock();
            if handles.is_some() {
                // Lost a concurrent start race; unwind this set of tasks.
                cancel.cancel();
                return Ok(());
            }
            *handles = Some(WorkerHandles { cancel, tasks });
        }

        self.emit(Event::WorkerStarted {
            worker_id: self.inner.worker_id.clone(),
            concurrency: self.inner.config.concurrency,
        });
        Ok(())
    }

    /// Stop the pool, draining in-flight handlers.
    pub async fn stop(&self) {
        let handles = self.inner.handles.lock().take();
        let Some(handles) = handles else { return };
        handles.cancel.cancel();
        for task in handles.tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "worker task ended abnormally");
            }
        }
        self.emit(Event::WorkerStopped { worker_id: self.inner.worker_id.clone() });
    }

    /// Drive one claimed job through its remaining steps.
    async fn process_job(&self, mut job: Job) {
        let clock = self.inner.clock.clone();
        let now_fn: Arc<dyn Fn() -> i64 + Send + Sync> = Arc::new(move || clock.epoch_ms());

        loop {
            let Some(idx) = job.next_step_index() else { break };
            let step_name = job.steps[idx].name.clone();

            let now = self.now_ms();
            job.steps[idx].start(now);
            match self
                .inner
                .store
                .flush_steps(&job.id, &job.steps, job.attempts, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // Lease revoked (stalled scan); a newer attempt owns the job.
                    tracing::debug!(job_id = %job.id, "lease lost before step start, abandoning attempt");
                    return;
                }
                Err(err) => {
                    // Leave the lease in place; the stalled scan recovers it.
                    tracing::warn!(job_id = %job.id, error = %err, "step flush failed, abandoning attempt");
                    return;
                }
            }

            let result = match self.inner.registry.get(&job.job_type) {
                Some(handler) => {
                    let ctx =
                        StepContext::new(self.inner.store.clone(), job.id, Arc::clone(&now_fn));
                    handler.run(&job, &step_name, &ctx).await
                }
                // Participates in the retry/DLQ pipeline so operators can
                // register the handler without losing the job.
                None => Err(HandlerError::new(format!(
                    "No handler registered for job type: {}",
                    job.job_type
                ))),
            };

            let now = self.now_ms();
            match result {
                Ok(output) => {
                    job.steps[idx].complete(now, output);
                    match self
                        .inner
                        .store
                        .flush_steps(&job.id, &job.steps, job.attempts, now)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::debug!(job_id = %job.id, "lease lost after step, abandoning attempt");
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(job_id = %job.id, error = %err, "step flush failed, abandoning attempt");
                            return;
                        }
                    }
                }
                Err(err) => {
                    job.steps[idx].fail(now, err.message());
                    if let Err(flush_err) = self
                        .inner
                        .store
                        .flush_steps(&job.id, &job.steps, job.attempts, now)
                        .await
                    {
                        tracing::warn!(job_id = %job.id, error = %flush_err, "step flush failed during failure handling");
                    }
                    self.emit(Event::JobError {
                        job_id: job.id,
                        queue: job.queue.clone(),
                        step: step_name,
                        error: err.message().to_string(),
                    });
                    if let Err(fail_err) = self.fail_attempt(&job, err.message()).await {
                        tracing::warn!(job_id = %job.id, error = %fail_err, "failure handling hit the store");
                    }
                    return;
                }
            }
        }

        let now = self.now_ms();
        let metrics = JobMetrics {
            wait_ms: job.metrics.wait_ms,
            processing_ms: now - job.started_at.unwrap_or(now),
            total_ms: now - job.created_at,
            retry_count: job.metrics.retry_count,
        };
        match self.inner.store.complete_job(&job, &metrics, now).await {
            Ok(true) => self.emit(Event::JobCompleted {
                job_id: job.id,
                queue: job.queue.clone(),
                processing_ms: metrics.processing_ms,
                total_ms: metrics.total_ms,
                attempts: job.attempts,
            }),
            Ok(false) => {
                tracing::debug!(job_id = %job.id, "completion lost the race, lease already released");
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "completion failed, stalled scan will recover");
            }
        }
    }

    /// Route a failed attempt: reschedule with backoff while attempts
    /// remain, otherwise promote to the dead-letter table. All writes are
    /// conditional on the failing attempt's lease token.
    pub(crate) async fn fail_attempt(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let now = self.now_ms();
        if job.attempts < job.max_attempts {
            let delay_ms = self.inner.config.retry.delay_ms(job.attempts);
            let rescheduled = self
                .inner
                .store
                .schedule_retry(&job.id, job.attempts, error, now + delay_ms, now)
                .await?;
            if rescheduled {
                self.emit(Event::JobRetrying {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    attempt: job.attempts,
                    max_attempts: job.max_attempts,
                    delay_ms,
                    error: error.to_string(),
                });
            }
            return Ok(());
        }

        // Re-read the row so the DLQ record captures step_state written by
        // the handler during this attempt. A changed lease means another
        // attempt owns the job now; promotion is skipped.
        let fresh = self.inner.store.get_job(&job.id).await?;
        let fresh = fresh.as_ref().unwrap_or(job);
        if fresh.attempts != job.attempts {
            return Ok(());
        }
        if let Some(dlq) = self.inner.store.promote_to_dlq(fresh, error, now).await? {
            self.emit(Event::JobDeadLetter {
                job_id: fresh.id,
                dlq_id: dlq.id,
                queue: fresh.queue.clone(),
                attempts: fresh.attempts,
                error: error.to_string(),
            });
        }
        Ok(())
    }
}

/// Claim loop: every poll interval, claim up to `batch_size` jobs while
/// processing slots are free, spawning one task per job. A slow handler
/// occupies its slot only; polling continues for the rest.
async fn poll_loop<C: Clock>(queue: Queue<C>, cancel: CancellationToken) {
    let poll_interval = Duration::from_millis(queue.config().poll_interval_ms);
    let concurrency = queue.config().concurrency;
    let batch_size = queue.config().batch_size;
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        while let Some(result) = in_flight.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    // Contained: the held lease is recovered by the stalled scan.
                    tracing::warn!("job task panicked, lease recovery via stalled scan");
                }
            }
        }

        let mut claimed = 0;
        while in_flight.len() < concurrency && claimed < batch_size {
            match queue.claim_next().await {
                Ok(Some(job)) => {
                    claimed += 1;
                    queue.emit(Event::JobStarted {
                        job_id: job.id,
                        queue: job.queue.clone(),
                        job_type: job.job_type.clone(),
                        worker_id: queue.worker_id().clone(),
                        attempt: job.attempts,
                    });
                    let queue = queue.clone();
                    in_flight.spawn(async move { queue.process_job(job).await });
                }
                Ok(None) => break,
                Err(err) => {
                    // As if the claim never happened; re-poll later.
                    tracing::warn!(error = %err, "claim failed");
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    // Drain in-flight handlers on shutdown.
    while in_flight.join_next().await.is_some() {}
}

/// Recover jobs whose lease deadline passed: emit `job:stalled` and treat
/// each as a failed attempt (retry or dead-letter).
async fn stalled_loop<C: Clock>(queue: Queue<C>, cancel: CancellationToken) {
    let interval = Duration::from_millis(queue.config().stalled_check_interval_ms);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let now = queue.now_ms();
        let stalled = match queue.inner.store.fetch_stalled(now).await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(error = %err, "stalled scan failed");
                continue;
            }
        };
        for job in stalled {
            let timeout_ms = match (job.timeout_at, job.started_at) {
                (Some(timeout_at), Some(started_at)) => timeout_at - started_at,
                _ => queue.config().job_timeout_ms,
            };
            queue.emit(Event::JobStalled {
                job_id: job.id,
                queue: job.queue.clone(),
                worker_id: job.worker_id.clone(),
                timeout_ms,
            });
            let error = format!("Job timed out after {timeout_ms} ms");
            if let Err(err) = queue.fail_attempt(&job, &error).await {
                tracing::warn!(job_id = %job.id, error = %err, "stalled recovery failed");
            }
        }
    }
}

/// Periodically recompute per-queue snapshots.
async fn stats_loop<C: Clock>(queue: Queue<C>, cancel: CancellationToken) {
    let interval = Duration::from_millis(queue.config().stats_interval_ms);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(err) = queue.inner.store.recompute_stats(queue.now_ms()).await {
            tracing::warn!(error = %err, "stats recompute failed");
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
