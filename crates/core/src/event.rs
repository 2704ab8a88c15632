// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Item-change notifications pushed to presentation subscribers.
//!
//! The engine broadcasts a change record whenever a task or task instance
//! mutates in a way a consumer could observe. Payloads are plain snapshots
//! so subscribers never hold references into scheduler state.

use crate::instance::{TaskInstance, TaskInstanceId, TaskInstanceStatus};
use crate::task::{Task, TaskExecutionStats};
use serde::{Deserialize, Serialize};

/// Presentation snapshot of a configured task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub id: String,
    pub label: String,
    pub group: String,
    pub mean: String,
    pub target: String,
    pub enabled: bool,
    pub running_instances: u32,
    pub max_instances: u32,
    pub last_execution: Option<TaskExecutionStats>,
}

impl From<&Task> for TaskNotification {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            label: task.label.clone(),
            group: task.group.clone(),
            mean: task.mean.to_string(),
            target: task.target.clone(),
            enabled: task.enabled,
            running_instances: task.running_instances(),
            max_instances: task.max_instances,
            last_execution: task.last_execution_stats(),
        }
    }
}

/// Presentation snapshot of a task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceNotification {
    pub id: TaskInstanceId,
    pub task_id: String,
    pub group_id: TaskInstanceId,
    pub status: TaskInstanceStatus,
    pub success: bool,
    pub return_code: i32,
    pub force: bool,
    pub target: Option<String>,
    pub submitted_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
}

impl From<&TaskInstance> for InstanceNotification {
    fn from(instance: &TaskInstance) -> Self {
        Self {
            id: instance.id,
            task_id: instance.task.id.clone(),
            group_id: instance.group_id,
            status: instance.status,
            success: instance.success,
            return_code: instance.return_code,
            force: instance.force,
            target: instance.target.as_ref().map(|h| h.hostname.clone()),
            submitted_at_ms: instance.submitted_at_ms,
            started_at_ms: instance.started_at_ms,
            finished_at_ms: instance.finished_at_ms,
        }
    }
}

/// One observable mutation of an item, with its previous state when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "qualifier", rename_all = "snake_case")]
pub enum ItemChange {
    Task { new: TaskNotification, old: Option<TaskNotification> },
    TaskInstance { new: InstanceNotification, old: Option<InstanceNotification> },
}

impl ItemChange {
    pub fn task(new: &Task, old: Option<TaskNotification>) -> Self {
        Self::Task { new: new.into(), old }
    }

    pub fn instance(new: &TaskInstance, old: Option<InstanceNotification>) -> Self {
        Self::TaskInstance { new: new.into(), old }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;