// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::jobs::NewJob;
use rq_core::{JobId, Priority};
use sqlx::Row;

fn sample(id: JobId) -> NewJob {
    NewJob {
        id,
        queue: "renders".to_string(),
        job_type: "render".to_string(),
        payload: serde_json::json!({"x": 1}),
        priority: Priority::Normal,
        max_attempts: 3,
        idempotency_key: None,
        steps: vec!["execute".to_string()],
        tags: Vec::new(),
        scheduled_at: 1_000,
        timeout_ms: None,
        created_at: 1_000,
    }
}

#[tokio::test]
async fn open_creates_the_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderq.db");
    let store = Store::open(&path).await.unwrap();
    assert!(path.exists());
    store.close().await;
}

#[tokio::test]
async fn open_runs_in_wal_mode() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("renderq.db")).await.unwrap();
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let mode: String = row.get(0);
    assert_eq!(mode.to_lowercase(), "wal");
    store.close().await;
}

#[tokio::test]
async fn rows_survive_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderq.db");
    let id = JobId::new();

    {
        let store = Store::open(&path).await.unwrap();
        store.insert_job(sample(id)).await.unwrap();
        store.close().await;
    }

    let store = Store::open(&path).await.unwrap();
    let job = store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.queue, "renders");
    assert_eq!(job.payload, serde_json::json!({"x": 1}));
    store.close().await;
}

#[tokio::test]
async fn migrate_is_idempotent_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renderq.db");
    for _ in 0..3 {
        let store = Store::open(&path).await.unwrap();
        store.close().await;
    }
}
