// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use rq_core::{Event, EventKind};

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous fan-out of lifecycle events to registered listeners.
///
/// Listeners run on the emitter's task and must stay cheap and
/// non-blocking; an observer that needs heavy work enqueues its own job.
#[derive(Default)]
pub struct EventBus {
    by_kind: RwLock<HashMap<EventKind, Vec<Listener>>>,
    all: RwLock<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn subscribe(&self, kind: EventKind, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.by_kind
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Register a listener for every event.
    pub fn subscribe_all(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.all.write().push(Arc::new(listener));
    }

    /// Deliver `event` to all matching listeners, synchronously.
    pub fn emit(&self, event: &Event) {
        tracing::debug!(target: "rq::events", "{}", event.log_summary());

        // Clone the listener lists out of the locks so a listener that
        // subscribes re-entrantly cannot deadlock the bus.
        let kind_listeners: Vec<Listener> = self
            .by_kind
            .read()
            .get(&event.kind())
            .map(|l| l.to_vec())
            .unwrap_or_default();
        let all_listeners: Vec<Listener> = self.all.read().to_vec();

        for listener in kind_listeners.iter().chain(all_listeners.iter()) {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.by_kind.read().len())
            .field("all", &self.all.read().len())
            .finish()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
