// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enqueue, dedup, and stats specs.

use super::support::*;
use rq_core::{EventKind, JobStatus};
use rq_queue::{EnqueueOptions, EnqueueRequest};

#[tokio::test]
async fn duplicate_idempotency_key_collapses_to_one_job() {
    let queue = mem_queue(fast_config()).await;
    let events = collect_events(&queue);

    let a = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({"x": 1}),
            EnqueueOptions::new().idempotency_key("k1"),
        )
        .await
        .unwrap();
    let b = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({"x": 1}),
            EnqueueOptions::new().idempotency_key("k1"),
        )
        .await
        .unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(count_kind(&events, EventKind::JobDeduplicated), 1);
    assert_eq!(queue.list_jobs(Some("renders"), None, 100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn enqueue_batch_creates_every_job_and_one_batch_event() {
    let queue = mem_queue(fast_config()).await;
    let events = collect_events(&queue);

    let jobs = queue
        .enqueue_batch(
            (0..3)
                .map(|i| {
                    EnqueueRequest::new(
                        "renders",
                        "render",
                        serde_json::json!({ "i": i }),
                        EnqueueOptions::new(),
                    )
                })
                .collect(),
        )
        .await
        .unwrap();

    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
    assert_eq!(count_kind(&events, EventKind::JobCreated), 3);
    assert_eq!(count_kind(&events, EventKind::JobBatchCreated), 1);
}

#[tokio::test]
async fn zero_delay_job_is_pending_and_immediately_eligible() {
    let queue = mem_queue(fast_config()).await;
    let job = queue
        .enqueue("renders", "render", serde_json::json!({}), EnqueueOptions::new().delay_ms(0))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(queue.claim_next().await.unwrap().is_some());
}

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let queue = mem_queue(fast_config()).await;
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_snapshot_is_published_by_the_worker() {
    let queue = mem_queue(fast_config().stats_interval_ms(50)).await;
    queue.register_handler(
        "render",
        rq_queue::FnHandler::new(
            |_job: rq_core::Job, _step: String, _ctx: rq_queue::StepContext| async move {
                Ok(None)
            },
        ),
    );

    let job = queue
        .enqueue("renders", "render", serde_json::json!({}), EnqueueOptions::new())
        .await
        .unwrap();
    queue.start().await.unwrap();
    wait_for_status(&queue, &job.id, JobStatus::Completed).await;

    let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
    loop {
        if let Some(stats) = queue.get_queue_stats("renders").await.unwrap() {
            if stats.completed == 1 {
                assert_eq!(stats.pending, 0);
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "stats loop never published a snapshot"
        );
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    queue.stop().await;
}
