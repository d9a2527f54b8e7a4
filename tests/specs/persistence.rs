// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durability specs against a file-backed store.

use super::support::*;
use rq_core::{JobStatus, WorkerId};
use rq_queue::{EnqueueOptions, Queue};
use rq_store::Store;

#[tokio::test]
async fn jobs_survive_a_store_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderq.db");

    let job_id = {
        let store = Store::open(&path).await.unwrap();
        let queue = Queue::new(store.clone(), fast_config()).unwrap();
        let job = queue
            .enqueue(
                "renders",
                "render",
                serde_json::json!({"comp": "intro"}),
                EnqueueOptions::new().idempotency_key("persist-1"),
            )
            .await
            .unwrap();
        store.close().await;
        job.id
    };

    let store = Store::open(&path).await.unwrap();
    let queue = Queue::new(store, fast_config()).unwrap();
    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.payload, serde_json::json!({"comp": "intro"}));

    // Idempotency survives the reopen too.
    let again = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({"comp": "intro"}),
            EnqueueOptions::new().idempotency_key("persist-1"),
        )
        .await
        .unwrap();
    assert_eq!(again.id, job_id);
}

#[tokio::test]
async fn restarted_worker_recovers_its_own_leases() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderq.db");
    let pinned = WorkerId::new("wrk_pinned");

    let job_id = {
        let store = Store::open(&path).await.unwrap();
        let queue =
            Queue::new(store.clone(), fast_config().worker_id(pinned.clone())).unwrap();
        let job = queue
            .enqueue("renders", "render", serde_json::json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        // Claim, then "crash" without completing.
        queue.claim_next().await.unwrap().unwrap();
        store.close().await;
        job.id
    };

    let store = Store::open(&path).await.unwrap();
    let queue = Queue::new(store, fast_config().worker_id(pinned)).unwrap();
    let before = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(before.status, JobStatus::Processing);

    queue.register_handler(
        "render",
        rq_queue::FnHandler::new(
            |_job: rq_core::Job, _step: String, _ctx: rq_queue::StepContext| async move {
                Ok(None)
            },
        ),
    );

    // start() resets leases held by this worker identity, so the job is
    // re-claimed and completes well before its old 60s lease would expire.
    queue.start().await.unwrap();
    let done = wait_for_status(&queue, &job_id, JobStatus::Completed).await;
    assert_eq!(done.attempts, 2);
    queue.stop().await;
}
