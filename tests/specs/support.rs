// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use rq_core::{Event, EventKind, Job, JobId, JobStatus};
use rq_queue::{BackoffStrategy, Queue, QueueConfig, RetryPolicy};
use rq_store::Store;

pub const SPEC_WAIT_MAX: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Route queue logs through the test harness when RUST_LOG is set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Spec-speed tuning: tight polling, fixed small backoff.
pub fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .poll_interval_ms(10)
        .stalled_check_interval_ms(25)
        .retry(RetryPolicy::new(BackoffStrategy::Fixed, 20, 1_000))
}

/// Queue over a fresh in-memory store.
pub async fn mem_queue(config: QueueConfig) -> Queue {
    init_tracing();
    let store = Store::open_in_memory().await.expect("in-memory store opens");
    Queue::new(store, config).expect("valid config")
}

/// Collect every emitted event for later assertions.
pub fn collect_events(queue: &Queue) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    queue.on_all(move |e| sink.lock().expect("collector lock").push(e.clone()));
    events
}

pub fn count_kind(events: &Arc<Mutex<Vec<Event>>>, kind: EventKind) -> usize {
    events
        .lock()
        .expect("collector lock")
        .iter()
        .filter(|e| e.kind() == kind)
        .count()
}

/// Poll until `condition` holds or the spec timeout elapses.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Poll until the job reaches `status`, panicking on timeout.
pub async fn wait_for_status(queue: &Queue, id: &JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + SPEC_WAIT_MAX;
    loop {
        let job = queue
            .get_job(id)
            .await
            .expect("job lookup")
            .expect("job exists");
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status}; job is {} (error: {:?})",
            job.status,
            job.error
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
