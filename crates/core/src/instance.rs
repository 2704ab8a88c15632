// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task instances: the record of one execution attempt.

use crate::host::Host;
use crate::params::{ParamSet, ParamsProvider};
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Globally unique, human-sortable instance identifier.
///
/// Derived from the submission timestamp and a process-wide sequence
/// counter (`epoch_ms * 1000 + seq % 1000`), so ids sort by creation
/// time and stay readable in logs. Not a hash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TaskInstanceId(pub u64);

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl TaskInstanceId {
    pub fn next(epoch_ms: u64) -> Self {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 1000;
        Self(epoch_ms * 1000 + seq)
    }
}

impl std::fmt::Display for TaskInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskInstanceStatus {
    Queued,
    Running,
    Success,
    Failure,
    Canceled,
}

crate::simple_display! {
    TaskInstanceStatus {
        Queued => "queued",
        Running => "running",
        Success => "success",
        Failure => "failure",
        Canceled => "canceled",
    }
}

impl TaskInstanceStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

/// Correlation of a subtask instance with its enclosing workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowParent {
    pub instance: TaskInstanceId,
    /// Index of the subtask step in the workflow's graph.
    pub step: usize,
}

/// One execution attempt of a task.
///
/// Created by admission control, queued until started, then owned by an
/// executor until completion. Captures the task by value: a config reload
/// rebinds queued instances but leaves running ones on their snapshot.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub id: TaskInstanceId,
    pub task: Task,
    pub overriding_params: ParamSet,
    pub submitted_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    /// Resolved at start time, or pinned at request time for cluster
    /// `each` fan-out.
    pub target: Option<Host>,
    pub status: TaskInstanceStatus,
    pub success: bool,
    pub return_code: i32,
    /// Bypass instance-limit and resource checks (still accounted).
    pub force: bool,
    /// Shared by all fan-out siblings of one cluster `each` request.
    pub group_id: TaskInstanceId,
    /// Latched by the execution mean once aborting is actually safe.
    pub abortable: Arc<AtomicBool>,
    /// Set on subtask instances spawned by a workflow step.
    pub workflow_parent: Option<WorkflowParent>,
}

impl TaskInstance {
    pub fn new(task: Task, overriding_params: ParamSet, force: bool, epoch_ms: u64) -> Self {
        let id = TaskInstanceId::next(epoch_ms);
        Self {
            id,
            task,
            overriding_params,
            submitted_at_ms: epoch_ms,
            started_at_ms: None,
            finished_at_ms: None,
            target: None,
            status: TaskInstanceStatus::Queued,
            success: false,
            return_code: 0,
            force,
            group_id: id,
            abortable: Arc::new(AtomicBool::new(false)),
            workflow_parent: None,
        }
    }

    pub fn in_group(mut self, group_id: TaskInstanceId) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn for_workflow(mut self, parent: WorkflowParent) -> Self {
        self.workflow_parent = Some(parent);
        self
    }

    pub fn pinned_to(mut self, host: Host) -> Self {
        self.target = Some(host);
        self
    }

    pub fn is_abortable(&self) -> bool {
        self.abortable.load(Ordering::SeqCst)
    }

    pub fn set_abortable(&self, abortable: bool) {
        self.abortable.store(abortable, Ordering::SeqCst);
    }

    pub fn mark_started(&mut self, target: Host, epoch_ms: u64) {
        self.target = Some(target);
        self.started_at_ms = Some(epoch_ms);
        self.status = TaskInstanceStatus::Running;
    }

    pub fn mark_finished(&mut self, success: bool, return_code: i32, epoch_ms: u64) {
        self.finished_at_ms = Some(epoch_ms);
        self.success = success;
        self.return_code = return_code;
        self.status =
            if success { TaskInstanceStatus::Success } else { TaskInstanceStatus::Failure };
    }

    /// Cancel a not-yet-started request: failed, return code -1.
    pub fn mark_canceled(&mut self, epoch_ms: u64) {
        self.finished_at_ms = Some(epoch_ms);
        self.success = false;
        self.return_code = -1;
        self.status = TaskInstanceStatus::Canceled;
    }

    /// Wall-clock runtime, once started.
    pub fn duration_ms(&self, now_ms: u64) -> Option<u64> {
        let start = self.started_at_ms?;
        Some(self.finished_at_ms.unwrap_or(now_ms).saturating_sub(start))
    }
}

/// Exposes instance fields to placeholder evaluation (`%!taskid` etc.).
impl ParamsProvider for TaskInstance {
    fn param(&self, key: &str) -> Option<String> {
        match key {
            "!taskid" => Some(self.task.id.clone()),
            "!taskinstanceid" => Some(self.id.to_string()),
            "!taskinstancegroupid" => Some(self.group_id.to_string()),
            "!status" => Some(self.status.to_string()),
            "!returncode" => Some(self.return_code.to_string()),
            "!target" => self.target.as_ref().map(|h| h.hostname.clone()),
            "!submissiondate" => Some(self.submitted_at_ms.to_string()),
            "!startdate" => self.started_at_ms.map(|ms| ms.to_string()),
            "!enddate" => self.finished_at_ms.map(|ms| ms.to_string()),
            "!durationms" => {
                let end = self.finished_at_ms?;
                Some(end.saturating_sub(self.started_at_ms?).to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;