// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional built-in handlers.
//!
//! Simulated stand-ins for the real render and notification effects, useful
//! in development and tests. They are conveniences: nothing registers them
//! automatically, and collaborating services replace them with real
//! implementations that respect the configured job timeout.

use std::time::Duration;

use serde_json::{json, Value};

use rq_core::{Clock, Job};

use crate::handler::{Handler, HandlerError, StepContext};
use crate::queue::Queue;

const DEFAULT_FRAMES: u64 = 120;
const FRAMES_PER_TICK: u64 = 40;

/// Simulated render: walks a frame counter through step state so a retried
/// attempt resumes where the last one stopped, then records an upload URL.
pub struct RenderHandler;

#[async_trait::async_trait]
impl Handler for RenderHandler {
    async fn run(
        &self,
        job: &Job,
        _step: &str,
        ctx: &StepContext,
    ) -> Result<Option<Value>, HandlerError> {
        // A prior attempt that got as far as uploading left its marker.
        if let Some(url) = ctx.get_state("uploadUrl").await.map_err(queue_err)? {
            return Ok(Some(json!({ "uploadUrl": url, "resumed": true })));
        }

        let frames_total = match ctx.get_state("framesTotal").await.map_err(queue_err)? {
            Some(v) => v.as_u64().unwrap_or(DEFAULT_FRAMES),
            None => {
                let total = job
                    .payload
                    .get("frames")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_FRAMES);
                ctx.update_state("framesTotal", json!(total))
                    .await
                    .map_err(queue_err)?;
                total
            }
        };

        let mut rendered = ctx
            .get_state("framesRendered")
            .await
            .map_err(queue_err)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        while rendered < frames_total {
            rendered = (rendered + FRAMES_PER_TICK).min(frames_total);
            tokio::time::sleep(Duration::from_millis(2)).await;
            ctx.update_state("framesRendered", json!(rendered))
                .await
                .map_err(queue_err)?;
        }

        let upload_url = format!("file:///renders/{}.mp4", job.id);
        ctx.update_state("uploadUrl", json!(upload_url.clone()))
            .await
            .map_err(queue_err)?;

        Ok(Some(json!({
            "framesRendered": rendered,
            "uploadUrl": upload_url,
        })))
    }
}

/// Simulated notification: logs the delivery and records `sentAt`.
pub struct NotifyHandler;

#[async_trait::async_trait]
impl Handler for NotifyHandler {
    async fn run(
        &self,
        job: &Job,
        _step: &str,
        ctx: &StepContext,
    ) -> Result<Option<Value>, HandlerError> {
        let target = job
            .payload
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or("(unspecified)");
        tokio::time::sleep(Duration::from_millis(1)).await;

        let sent_at = ctx.now_ms();
        ctx.update_state("sentAt", json!(sent_at))
            .await
            .map_err(queue_err)?;
        tracing::info!(job_id = %job.id, target, "notification delivered");

        Ok(Some(json!({ "sentAt": sent_at })))
    }
}

fn queue_err(err: crate::error::QueueError) -> HandlerError {
    HandlerError::new(err.to_string())
}

/// Register both built-ins under their conventional type names.
pub fn register_builtin_handlers<C: Clock>(queue: &Queue<C>) {
    queue.register_handler("render", RenderHandler);
    queue.register_handler("notify", NotifyHandler);
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
