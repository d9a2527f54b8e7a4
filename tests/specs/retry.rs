// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry pipeline specs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::support::*;
use rq_core::{Event, EventKind, Job, JobStatus};
use rq_queue::{
    BackoffStrategy, EnqueueOptions, FnHandler, HandlerError, RetryPolicy, StepContext,
};

#[tokio::test(flavor = "multi_thread")]
#[serial_test::serial(timing)]
async fn fails_once_then_completes_with_backoff_in_window() {
    let config = fast_config().retry(RetryPolicy::new(BackoffStrategy::Fixed, 100, 10_000));
    let queue = mem_queue(config).await;
    let events = collect_events(&queue);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    queue.register_handler(
        "render",
        FnHandler::new(move |_job: Job, _step: String, _ctx: StepContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(HandlerError::new("flaky"))
                } else {
                    Ok(None)
                }
            }
        }),
    );

    let job = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(3u32),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();
    let done = wait_for_status(&queue, &job.id, JobStatus::Completed).await;
    queue.stop().await;

    assert_eq!(done.attempts, 2);
    assert_eq!(done.metrics.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(count_kind(&events, EventKind::JobRetrying), 1);
    assert_eq!(count_kind(&events, EventKind::JobCompleted), 1);
    let events = events.lock().unwrap();
    let delay = events
        .iter()
        .find_map(|e| match e {
            Event::JobRetrying { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .unwrap();
    // Fixed strategy, base 100ms: delay in [base, base + 10%).
    assert!((100..110).contains(&delay), "delay {delay} outside jitter window");
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_invocations_never_exceed_max_attempts() {
    let queue = mem_queue(fast_config()).await;
    let events = collect_events(&queue);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    queue.register_handler(
        "render",
        FnHandler::new(move |_job: Job, _step: String, _ctx: StepContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(HandlerError::new("always fails")) }
        }),
    );

    let job = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new().max_attempts(3u32),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();
    let dead = wait_for_status(&queue, &job.id, JobStatus::DeadLetter).await;
    queue.stop().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(dead.attempts, 3);
    // Exactly one terminal transition.
    assert_eq!(count_kind(&events, EventKind::JobDeadLetter), 1);
    assert_eq!(count_kind(&events, EventKind::JobCompleted), 0);
    assert_eq!(count_kind(&events, EventKind::JobRetrying), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn attempts_stay_within_bound_under_concurrency() {
    let queue = mem_queue(fast_config().concurrency(4).batch_size(4)).await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    queue.register_handler(
        "render",
        FnHandler::new(move |_job: Job, _step: String, _ctx: StepContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(HandlerError::new("no")) }
        }),
    );

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(
            queue
                .enqueue(
                    "renders",
                    "render",
                    serde_json::json!({}),
                    EnqueueOptions::new().max_attempts(2u32),
                )
                .await
                .unwrap()
                .id,
        );
    }
    queue.start().await.unwrap();
    for id in &ids {
        wait_for_status(&queue, id, JobStatus::DeadLetter).await;
    }
    queue.stop().await;

    // 8 jobs x 2 attempts, never more.
    assert_eq!(calls.load(Ordering::SeqCst), 16);
}
