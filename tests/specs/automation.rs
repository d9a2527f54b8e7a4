// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Automation fan-out specs.

use super::support::*;
use rq_automation::{
    Action, AutomationRunner, ExecutionStatus, NewAutomation, RunnerConfig, StepResultStatus,
    Trigger, TriggerOptions,
};
use rq_core::{Job, JobStatus};
use rq_queue::{FnHandler, StepContext};

fn fan_out_automation() -> NewAutomation {
    NewAutomation::new(
        "proj_1",
        "on-upload",
        Trigger::Webhook,
        vec![
            Action::Render {
                composition_id: "intro".to_string(),
                input_props_template: serde_json::json!({"title": "{{title}}", "fps": 30}),
                output_overrides: None,
            },
            Action::Notify {
                channel: "email".to_string(),
                target: "u@x".to_string(),
                template: Some("done".to_string()),
            },
        ],
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_fans_out_to_interpolated_children() {
    let queue = mem_queue(fast_config()).await;
    let runner = AutomationRunner::new(queue.clone(), RunnerConfig::default());

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );
    queue.register_handler(
        "notify",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );

    let automation = runner.create_automation(fan_out_automation()).unwrap();
    queue.start().await.unwrap();

    let outcome = runner
        .trigger(
            &automation.id,
            serde_json::json!({"title": "hello"}),
            TriggerOptions::new(),
        )
        .await
        .unwrap();

    // The composite completes, which drives the execution to completed.
    wait_for_status(&queue, &outcome.job_id, JobStatus::Completed).await;
    let execution = runner.get_execution(&outcome.execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results.len(), 2);
    assert!(execution
        .results
        .iter()
        .all(|r| r.status == StepResultStatus::Success));

    // The render child carried the interpolated props and completes too.
    let renders = queue.list_jobs(Some("renders"), None, 10).await.unwrap();
    assert_eq!(renders.len(), 1);
    assert_eq!(
        renders[0].payload["input_props"],
        serde_json::json!({"title": "hello", "fps": 30})
    );
    wait_for_status(&queue, &renders[0].id, JobStatus::Completed).await;

    let notifies = queue.list_jobs(Some("notifications"), None, 10).await.unwrap();
    assert_eq!(notifies.len(), 1);
    wait_for_status(&queue, &notifies[0].id, JobStatus::Completed).await;

    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_action_list_completes_with_zero_results() {
    let queue = mem_queue(fast_config()).await;
    let runner = AutomationRunner::new(queue.clone(), RunnerConfig::default());

    let automation = runner
        .create_automation(NewAutomation::new("proj_1", "noop", Trigger::Webhook, vec![]))
        .unwrap();
    queue.start().await.unwrap();

    let outcome = runner
        .trigger(&automation.id, serde_json::Value::Null, TriggerOptions::new())
        .await
        .unwrap();
    wait_for_status(&queue, &outcome.job_id, JobStatus::Completed).await;
    queue.stop().await;

    let execution = runner.get_execution(&outcome.execution_id).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.results.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn children_carry_execution_scoped_idempotency_keys() {
    let queue = mem_queue(fast_config()).await;
    let runner = AutomationRunner::new(queue.clone(), RunnerConfig::default());

    queue.register_handler(
        "render",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );
    queue.register_handler(
        "notify",
        FnHandler::new(|_job: Job, _step: String, _ctx: StepContext| async move { Ok(None) }),
    );

    let automation = runner.create_automation(fan_out_automation()).unwrap();
    queue.start().await.unwrap();
    let outcome = runner
        .trigger(&automation.id, serde_json::json!({"title": "t"}), TriggerOptions::new())
        .await
        .unwrap();
    wait_for_status(&queue, &outcome.job_id, JobStatus::Completed).await;
    queue.stop().await;

    let renders = queue.list_jobs(Some("renders"), None, 10).await.unwrap();
    assert_eq!(
        renders[0].idempotency_key.as_deref(),
        Some(format!("{}:0", outcome.execution_id).as_str())
    );
    let notifies = queue.list_jobs(Some("notifications"), None, 10).await.unwrap();
    assert_eq!(
        notifies[0].idempotency_key.as_deref(),
        Some(format!("{}:1", outcome.execution_id).as_str())
    );
}
