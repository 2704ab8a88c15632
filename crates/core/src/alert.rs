// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert key vocabulary.
//!
//! Alerts are identified by dotted string keys so downstream sinks can route
//! and deduplicate them without knowing engine internals. The constructors
//! here are the single source of truth for the namespace.

/// Raised when admission refuses a request because the pending queue is full.
pub const SCHEDULER_MAX_QUEUED_REQUESTS: &str = "scheduler.maxqueuedrequests.reached";

/// Raised when a start is refused because every executor slot is busy.
pub const SCHEDULER_MAX_TOTAL_TASK_INSTANCES: &str = "scheduler.maxtotaltaskinstances.reached";

/// Raised when an instance finishes unsuccessfully, cancelled on the next
/// successful run of the same task.
pub fn task_failure(task_id: &str) -> String {
    format!("task.failure.{task_id}")
}

/// Raised when a running instance exceeds its expected maximum duration.
pub fn task_toolong(task_id: &str) -> String {
    format!("task.toolong.{task_id}")
}

/// Raised when an instance finishes faster than its expected minimum duration.
pub fn task_tooshort(task_id: &str) -> String {
    format!("task.tooshort.{task_id}")
}

/// Raised on the first stderr line surviving the task's exclusion filters.
pub fn task_stderr(task_id: &str) -> String {
    format!("task.stderr.{task_id}")
}

/// Raised when a start is refused because the task is at its instance limit.
pub fn task_max_instances_reached(task_id: &str) -> String {
    format!("task.maxinstancesreached.{task_id}")
}

/// Raised when a reservation fails against a target's configured resources.
pub fn resource_exhausted(target: &str) -> String {
    format!("resource.exhausted.{target}")
}

#[cfg(test)]
#[path = "alert_tests.rs"]
mod tests;