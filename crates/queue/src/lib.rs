// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rq-queue: durable queue engine for renderq.
//!
//! Wires the store, handler registry, event bus, and worker pool into the
//! queue façade collaborators consume: enqueue jobs, register handlers,
//! observe lifecycle events, start the pool.

mod backoff;
mod builtin;
mod bus;
mod config;
mod error;
mod handler;
mod queue;
mod worker;

pub use backoff::{BackoffStrategy, RetryPolicy};
pub use builtin::{register_builtin_handlers, RenderHandler, NotifyHandler};
pub use bus::EventBus;
pub use config::QueueConfig;
pub use error::QueueError;
pub use handler::{FnHandler, Handler, HandlerError, StepContext};
pub use queue::{EnqueueOptions, EnqueueRequest, Queue};
