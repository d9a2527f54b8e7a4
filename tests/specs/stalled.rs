// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stalled-lease recovery specs.

use std::time::Duration;

use serial_test::serial;

use super::support::*;
use rq_core::{Event, EventKind, Job, JobStatus};
use rq_queue::{EnqueueOptions, FnHandler, StepContext};

/// A handler that outlives its lease: the stalled scan re-dispatches the
/// job once (attempt 2), then dead-letters it with a timeout error.
#[tokio::test(flavor = "multi_thread")]
#[serial(timing)]
async fn expired_lease_is_retried_then_dead_lettered() {
    let queue = mem_queue(
        fast_config()
            .concurrency(2)
            .stalled_check_interval_ms(100)
            .max_attempts(2),
    )
    .await;
    let events = collect_events(&queue);

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            Ok(None)
        }),
    );

    let job = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().timeout_ms(200),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();

    let dead = wait_for_status(&queue, &job.id, JobStatus::DeadLetter).await;
    assert_eq!(dead.attempts, 2);
    assert!(dead.error.as_deref().unwrap().contains("timed out"));

    // Each expired lease emitted job:stalled; the first one retried.
    assert!(count_kind(&events, EventKind::JobStalled) >= 2);
    assert_eq!(count_kind(&events, EventKind::JobRetrying), 1);
    assert_eq!(count_kind(&events, EventKind::JobDeadLetter), 1);

    // Attempt numbers on the claims were 1 then 2.
    let attempts: Vec<u32> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::JobStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);

    let dlq = queue.get_dead_letter_jobs(Some("renders"), 10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert!(dlq[0].error.contains("timed out"));
    queue.stop().await;
}

#[tokio::test]
async fn stalled_count_reflects_expired_leases() {
    let queue = mem_queue(fast_config()).await;
    queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().timeout_ms(50),
        )
        .await
        .unwrap();
    queue.claim_next().await.unwrap().unwrap();

    assert_eq!(queue.get_stalled_jobs_count().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(queue.get_stalled_jobs_count().await.unwrap(), 1);
}
