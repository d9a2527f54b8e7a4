// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level specs: end-to-end behavior of the queue, worker pool,
//! and automation runner against an embedded store.

mod specs {
    pub mod support;

    mod automation;
    mod dlq;
    mod persistence;
    mod priority;
    mod queue;
    mod retry;
    mod stalled;
    mod steps;
}
