// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step resumption and step-state specs.

use super::support::*;
use rq_core::{Job, JobStatus, StepStatus};
use rq_queue::{EnqueueOptions, FnHandler, HandlerError, StepContext};

/// A handler that counts its invocations per step in step_state and fails
/// the `render` step on the first pass. The retry must observe `prepare`
/// already completed and not re-run its work.
#[tokio::test(flavor = "multi_thread")]
async fn completed_steps_survive_a_retry() {
    let queue = mem_queue(fast_config()).await;

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, step: String, ctx: StepContext| async move {
            let key = format!("calls_{step}");
            let calls = ctx
                .get_state(&key)
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                + 1;
            ctx.update_state(&key, serde_json::json!(calls))
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;

            if step == "render" && calls == 1 {
                return Err(HandlerError::new("render hiccup"));
            }
            Ok(Some(serde_json::json!({ "calls": calls })))
        }),
    );

    let job = queue
        .enqueue(
            "renders",
            "render",
            serde_json::json!({}),
            EnqueueOptions::new()
                .max_attempts(2u32)
                .steps(vec!["prepare".into(), "render".into(), "upload".into()]),
        )
        .await
        .unwrap();
    queue.start().await.unwrap();
    let done = wait_for_status(&queue, &job.id, JobStatus::Completed).await;
    queue.stop().await;

    assert_eq!(done.attempts, 2);
    assert_eq!(done.step_state["calls_prepare"], serde_json::json!(1));
    assert_eq!(done.step_state["calls_render"], serde_json::json!(2));
    assert_eq!(done.step_state["calls_upload"], serde_json::json!(1));

    assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
    // Step outputs recorded the per-step call counts.
    assert_eq!(
        done.steps[1].output.as_ref().unwrap()["calls"],
        serde_json::json!(2)
    );
    assert!(done.steps.iter().all(|s| s.duration_ms.is_some()));
}

#[tokio::test]
async fn step_state_round_trips_for_arbitrary_values() {
    let queue = mem_queue(fast_config()).await;
    let job = queue
        .enqueue("renders", "render", serde_json::json!({}), EnqueueOptions::new())
        .await
        .unwrap();

    let cases = [
        ("string", serde_json::json!("s3://bucket/out.mp4")),
        ("number", serde_json::json!(42.5)),
        ("bool", serde_json::json!(true)),
        ("null", serde_json::json!(null)),
        ("nested", serde_json::json!({"a": [1, 2, {"b": "c"}]})),
    ];
    for (key, value) in &cases {
        queue.update_step_state(&job.id, key, value.clone()).await.unwrap();
    }
    for (key, value) in &cases {
        assert_eq!(
            queue.get_step_state(&job.id, key).await.unwrap().as_ref(),
            Some(value),
            "round trip for {key}"
        );
    }
}
