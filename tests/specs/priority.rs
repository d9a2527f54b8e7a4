// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority claim-order specs.

use super::support::*;
use rq_core::{Event, EventKind, Job, JobId, JobStatus, Priority};
use rq_queue::{EnqueueOptions, FnHandler, StepContext};

#[tokio::test(flavor = "multi_thread")]
async fn urgent_beats_high_beats_normal() {
    let queue = mem_queue(fast_config().concurrency(1).batch_size(1)).await;
    let events = collect_events(&queue);

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );

    // Enqueued before the worker starts, in scrambled order.
    let j1 = enqueue(&queue, Priority::Normal).await;
    let j2 = enqueue(&queue, Priority::Urgent).await;
    let j3 = enqueue(&queue, Priority::High).await;

    queue.start().await.unwrap();
    assert!(wait_for(|| count_kind(&events, EventKind::JobCompleted) == 3).await);
    queue.stop().await;

    let started: Vec<JobId> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::JobStarted { job_id, .. } => Some(*job_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![j2, j3, j1]);
}

#[tokio::test]
async fn equal_priority_ties_break_by_eligibility_age() {
    let queue = mem_queue(fast_config()).await;

    let first = enqueue(&queue, Priority::Normal).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = enqueue(&queue, Priority::Normal).await;

    let a = queue.claim_next().await.unwrap().unwrap();
    let b = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
    assert_eq!(a.status, JobStatus::Processing);
}

async fn enqueue(queue: &rq_queue::Queue, priority: Priority) -> JobId {
    queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().priority(priority),
        )
        .await
        .unwrap()
        .id
}
