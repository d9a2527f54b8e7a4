// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-letter promotion and manual retry specs.

use super::support::*;
use rq_core::{EventKind, Job, JobStatus};
use rq_queue::{EnqueueOptions, FnHandler, HandlerError, StepContext};

#[tokio::test(flavor = "multi_thread")]
async fn manual_retry_reinjects_a_fresh_job() {
    let queue = mem_queue(fast_config()).await;

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move {
            Err(HandlerError::new("pipeline exploded"))
        }),
    );

    let original = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({"comp": "intro"}),
            EnqueueOptions::new().max_attempts(3u32),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();
    wait_for_status(&queue, &original.id, JobStatus::DeadLetter).await;
    queue.stop().await;

    let dlq = queue.get_dead_letter_jobs(Some("renders"), 10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].attempts, 3);
    assert_eq!(dlq[0].error, "pipeline exploded");

    let fresh = queue.retry_dead_letter(&dlq[0].id).await.unwrap();
    assert_ne!(fresh.id, original.id);
    assert_eq!(fresh.status, JobStatus::Pending);
    assert_eq!(fresh.attempts, 0);
    assert_eq!(fresh.queue, "renders");
    assert_eq!(fresh.job_type, "render");
    assert_eq!(fresh.payload, serde_json::json!({"comp": "intro"}));

    // DLQ record deleted; the original row remains as a dead_letter audit.
    assert!(queue.get_dead_letter_jobs(None, 10).await.unwrap().is_empty());
    let audit = queue.get_job(&original.id).await.unwrap().unwrap();
    assert_eq!(audit.status, JobStatus::DeadLetter);
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_jobs_never_reach_the_dead_letter_table() {
    let queue = mem_queue(fast_config()).await;
    let events = collect_events(&queue);

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );

    let job = queue
        .enqueue("renders", "render", serde_json::json!({}), EnqueueOptions::new())
        .await
        .unwrap();
    queue.start().await.unwrap();
    wait_for_status(&queue, &job.id, JobStatus::Completed).await;
    queue.stop().await;

    assert!(queue.get_dead_letter_jobs(None, 10).await.unwrap().is_empty());
    assert_eq!(count_kind(&events, EventKind::JobDeadLetter), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn dlq_record_captures_step_state() {
    let queue = mem_queue(fast_config()).await;

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, ctx: StepContext| async move {
            ctx.update_state("framesRendered", serde_json::json!(17))
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            Err(HandlerError::new("died mid-render"))
        }),
    );

    let job = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(1u32),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();
    wait_for_status(&queue, &job.id, JobStatus::DeadLetter).await;
    queue.stop().await;

    let dlq = queue.get_dead_letter_jobs(None, 10).await.unwrap();
    assert_eq!(dlq[0].step_state["framesRendered"], serde_json::json!(17));
}
