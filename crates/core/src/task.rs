// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task and task-group configuration entities.

use crate::calendar::Calendar;
use crate::cron::CronExpression;
use crate::params::ParamSet;
use crate::steps::StepGraph;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

/// Execution backend for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMean {
    /// Spawn a local process.
    Local,
    /// Run the command on the target host through ssh.
    Ssh,
    /// Issue a parametrized HTTP request to the target host.
    Http,
    /// Run an internal step graph of subtasks.
    Workflow,
    /// Succeed immediately with return code 0.
    DoNothing,
}

crate::simple_display! {
    ExecutionMean {
        Local => "local",
        Ssh => "ssh",
        Http => "http",
        Workflow => "workflow",
        DoNothing => "donothing",
    }
}

/// A cron schedule attached to a task.
///
/// The expression is kept pre-parsed; construction-time parse failures are
/// surfaced by the config layer, which logs and drops the trigger rather
/// than aborting the whole activation.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    pub expression: CronExpression,
    pub calendar: Option<Calendar>,
    /// Parameters overriding the task's own for instances this trigger fires.
    pub params: ParamSet,
}

impl CronTrigger {
    pub fn new(expression: CronExpression) -> Self {
        Self { expression, calendar: None, params: ParamSet::new() }
    }

    crate::setters! {
        set {
            params: ParamSet,
        }
        option {
            calendar: Calendar,
        }
    }
}

/// A named-event subscription that requests the task when the notice is posted.
#[derive(Debug, Clone)]
pub struct NoticeTrigger {
    pub notice: String,
    pub params: ParamSet,
}

impl NoticeTrigger {
    pub fn new(notice: impl Into<String>) -> Self {
        Self { notice: notice.into(), params: ParamSet::new() }
    }

    crate::setters! {
        set {
            params: ParamSet,
        }
    }
}

/// Statistics from a task's most recent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionStats {
    pub finished_at_ms: u64,
    pub success: bool,
    pub return_code: i32,
    pub duration_ms: u64,
}

/// A configured task.
///
/// Constructed once per configuration activation. The `instances` counter
/// and `last_execution` stats are shared cells adopted from the previous
/// generation's task on reload, so in-flight bookkeeping survives a
/// configuration change.
#[derive(Debug, Clone)]
pub struct Task {
    /// Fully-qualified task id, `<group>.<task>`.
    pub id: String,
    pub label: String,
    pub group: String,
    pub mean: ExecutionMean,
    /// Command template (argv for local/ssh, request path for http).
    pub command: String,
    /// Host or cluster id; empty means unset (a workflow parent's target
    /// is inherited at config activation).
    pub target: String,
    /// Resource requirements, kind -> quantity.
    pub resources: HashMap<String, u32>,
    pub max_instances: u32,
    pub params: Arc<ParamSet>,
    pub setenv: Vec<(String, String)>,
    pub unsetenv: Vec<String>,
    /// Regexes matched against stderr lines; matching lines are dropped
    /// instead of logged/alerted.
    pub stderr_filters: Vec<String>,
    pub cron_triggers: Vec<CronTrigger>,
    pub notice_triggers: Vec<NoticeTrigger>,
    pub enabled: bool,
    /// Cancel other queued requests for this task when a new one arrives.
    pub discard_aliases_on_start: bool,
    pub max_expected_duration: Option<Duration>,
    pub min_expected_duration: Option<Duration>,
    /// Arms an automatic abort when an execution runs longer than this.
    pub max_duration_before_abort: Option<Duration>,
    /// Step graph, for workflow-mean tasks.
    pub steps: Option<Arc<StepGraph>>,
    /// Live instance counter, shared across config generations.
    pub instances: Arc<AtomicU32>,
    /// Most recent execution outcome, shared across config generations.
    pub last_execution: Arc<Mutex<Option<TaskExecutionStats>>>,
}

impl Task {
    pub fn new(id: impl Into<String>, mean: ExecutionMean) -> Self {
        let id = id.into();
        let group = id.rsplit_once('.').map(|(g, _)| g.to_string()).unwrap_or_default();
        Self {
            label: id.clone(),
            id,
            group,
            mean,
            command: String::new(),
            target: String::new(),
            resources: HashMap::new(),
            max_instances: 1,
            params: Arc::new(ParamSet::new()),
            setenv: Vec::new(),
            unsetenv: Vec::new(),
            stderr_filters: Vec::new(),
            cron_triggers: Vec::new(),
            notice_triggers: Vec::new(),
            enabled: true,
            discard_aliases_on_start: false,
            max_expected_duration: None,
            min_expected_duration: None,
            max_duration_before_abort: None,
            steps: None,
            instances: Arc::new(AtomicU32::new(0)),
            last_execution: Arc::new(Mutex::new(None)),
        }
    }

    crate::setters! {
        into {
            label: String,
            command: String,
            target: String,
        }
        set {
            resources: HashMap<String, u32>,
            max_instances: u32,
            setenv: Vec<(String, String)>,
            unsetenv: Vec<String>,
            stderr_filters: Vec<String>,
            cron_triggers: Vec<CronTrigger>,
            notice_triggers: Vec<NoticeTrigger>,
            enabled: bool,
            discard_aliases_on_start: bool,
        }
        option {
            max_expected_duration: Duration,
            min_expected_duration: Duration,
            max_duration_before_abort: Duration,
        }
    }

    pub fn with_params(mut self, params: ParamSet) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_steps(mut self, steps: StepGraph) -> Self {
        self.steps = Some(Arc::new(steps));
        self
    }

    pub fn with_cron_trigger(mut self, trigger: CronTrigger) -> Self {
        self.cron_triggers.push(trigger);
        self
    }

    pub fn with_notice_trigger(mut self, trigger: NoticeTrigger) -> Self {
        self.notice_triggers.push(trigger);
        self
    }

    /// Adopt the live cells of the previous generation's task so that
    /// instance counts and last-execution stats survive a config reload.
    pub fn adopt_live_cells(&mut self, previous: &Task) {
        self.instances = Arc::clone(&previous.instances);
        self.last_execution = Arc::clone(&previous.last_execution);
    }

    pub fn running_instances(&self) -> u32 {
        self.instances.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn last_execution_stats(&self) -> Option<TaskExecutionStats> {
        *self.last_execution.lock()
    }
}

/// A namespace and parameter-inheritance node for tasks.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub id: String,
    pub label: String,
    pub params: Arc<ParamSet>,
}

impl TaskGroup {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self { label: id.clone(), id, params: Arc::new(ParamSet::new()) }
    }

    pub fn with_params(mut self, params: ParamSet) -> Self {
        self.params = Arc::new(params);
        self
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;