// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rq-store: SQLite persistence for the renderq job queue.
//!
//! Owns the `jobs`, `dead_letter_jobs`, `queue_stats`, and
//! `job_metrics_history` tables. Every mutation is a single statement or an
//! explicit transaction; the claim and cancel paths are conditional updates
//! so racing callers observe zero affected rows instead of partial state.

mod db;
mod dlq;
mod error;
mod jobs;
mod schema;
mod stats;

pub use db::Store;
pub use dlq::DeadLetterJob;
pub use error::StoreError;
pub use jobs::{InsertOutcome, NewJob};
pub use stats::{MetricsSample, QueueStatsRow};
