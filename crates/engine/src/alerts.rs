// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert sink seam.
//!
//! The engine raises and cancels alerts by key; delivery (mail, pager,
//! console) is a collaborator concern behind [`Alerter`]. Calls are
//! fire-and-forget so a slow sink can never stall the coordinator.

use parking_lot::Mutex;
use std::sync::Arc;

pub trait Alerter: Send + Sync {
    /// Raise a persistent alert. Raising an already-raised key is a no-op
    /// for well-behaved sinks.
    fn raise(&self, key: &str);
    /// Cancel a previously raised alert.
    fn cancel(&self, key: &str);
    /// Emit a one-shot alert with no raised state to cancel later.
    fn emit(&self, key: &str);
}

/// Default sink: alerts only show up in the logs.
#[derive(Debug, Default, Clone)]
pub struct NoopAlerter;

impl Alerter for NoopAlerter {
    fn raise(&self, key: &str) {
        tracing::warn!(alert = key, "alert raised");
    }

    fn cancel(&self, key: &str) {
        tracing::info!(alert = key, "alert canceled");
    }

    fn emit(&self, key: &str) {
        tracing::warn!(alert = key, "alert emitted");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Raised(String),
    Canceled(String),
    Emitted(String),
}

/// Test sink recording every call in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingAlerter {
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().clone()
    }

    /// Whether `key` is currently raised (raised more recently than canceled).
    pub fn is_raised(&self, key: &str) -> bool {
        let mut raised = false;
        for event in self.events.lock().iter() {
            match event {
                AlertEvent::Raised(k) if k == key => raised = true,
                AlertEvent::Canceled(k) if k == key => raised = false,
                _ => {}
            }
        }
        raised
    }
}

impl Alerter for RecordingAlerter {
    fn raise(&self, key: &str) {
        self.events.lock().push(AlertEvent::Raised(key.to_string()));
    }

    fn cancel(&self, key: &str) {
        self.events.lock().push(AlertEvent::Canceled(key.to_string()));
    }

    fn emit(&self, key: &str) {
        self.events.lock().push(AlertEvent::Emitted(key.to_string()));
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
