// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor pool and execution means.
//!
//! Each running instance occupies one slot of the pool and is driven by a
//! spawned mean task (local process, ssh, http, donothing). A free slot is
//! idle; occupied slots move Starting -> Running -> (Aborting) -> Finishing.
//! Workflow-mean instances occupy a slot for the workflow's lifetime but
//! are driven by the scheduler's step runner instead of a mean task.

mod http;
mod local;
mod ssh;

use crate::alerts::Alerter;
use cadence_core::{alert, ExecutionMean, ParamSet, ParamsProvider, Task, TaskInstance,
    TaskInstanceId};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of an occupied executor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Slot claimed, mean task not yet spawned.
    Starting,
    Running,
    /// Abort requested, waiting for the mean to wind down.
    Aborting,
    /// Outcome received, completion bookkeeping in progress.
    Finishing,
}

cadence_core::simple_display! {
    ExecutorState {
        Starting => "starting",
        Running => "running",
        Aborting => "aborting",
        Finishing => "finishing",
    }
}

/// Terminal result of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub return_code: i32,
}

impl ExecutionOutcome {
    pub fn succeeded() -> Self {
        Self { success: true, return_code: 0 }
    }

    pub fn failed(return_code: i32) -> Self {
        Self { success: false, return_code }
    }
}

/// Everything a mean needs to run one instance.
pub struct MeanContext {
    /// Snapshot with the target resolved and start time stamped.
    pub instance: TaskInstance,
    /// Effective parameter chain: overriding -> task -> group -> global.
    pub params: ParamSet,
    /// Environment assignments, global first so task entries win.
    pub setenv: Vec<(String, String)>,
    pub unsetenv: Vec<String>,
    pub cancel: CancellationToken,
    pub alerter: Arc<dyn Alerter>,
}

/// Run the instance's mean to completion or cancellation.
pub async fn execute(ctx: MeanContext) -> ExecutionOutcome {
    match ctx.instance.task.mean {
        ExecutionMean::Local => local::run(&ctx).await,
        ExecutionMean::Ssh => ssh::run(&ctx).await,
        ExecutionMean::Http => http::run(&ctx).await,
        ExecutionMean::DoNothing => {
            ctx.instance.set_abortable(true);
            ExecutionOutcome::succeeded()
        }
        ExecutionMean::Workflow => {
            // workflows are routed to the step runner before spawn
            tracing::error!(task = %ctx.instance.task.id, "workflow mean reached the executor");
            ExecutionOutcome::failed(-1)
        }
    }
}

/// One occupied slot.
pub struct RunningExecution {
    pub instance: TaskInstance,
    pub state: ExecutorState,
    pub cancel: CancellationToken,
    /// Created by a forced start beyond capacity; destroyed on finish
    /// without freeing a regular slot.
    pub temporary: bool,
    pub abort_timer: Option<JoinHandle<()>>,
    pub mean_task: Option<JoinHandle<()>>,
}

impl RunningExecution {
    pub fn new(instance: TaskInstance, temporary: bool) -> Self {
        Self {
            instance,
            state: ExecutorState::Starting,
            cancel: CancellationToken::new(),
            temporary,
            abort_timer: None,
            mean_task: None,
        }
    }

    /// Stop the abort timer, if armed. Called on every completion path.
    pub fn disarm_abort_timer(&mut self) {
        if let Some(timer) = self.abort_timer.take() {
            timer.abort();
        }
    }
}

/// Fixed-capacity pool of executor slots keyed by instance id.
pub struct ExecutorPool {
    capacity: usize,
    busy: HashMap<TaskInstanceId, RunningExecution>,
}

impl ExecutorPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, busy: HashMap::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply a new capacity from config. Running work is never killed;
    /// shrinking below the busy count only stalls new starts until
    /// executions drain.
    pub fn resize(&mut self, capacity: usize) {
        let regular = self.busy.values().filter(|e| !e.temporary).count();
        if capacity < regular {
            tracing::warn!(capacity, busy = regular, "pool shrunk below busy count");
        }
        self.capacity = capacity;
    }

    /// Whether a regular (non-forced) start can claim a slot. Temporary
    /// executors never count against capacity.
    pub fn has_free(&self) -> bool {
        self.busy.values().filter(|e| !e.temporary).count() < self.capacity
    }

    pub fn insert(&mut self, execution: RunningExecution) {
        self.busy.insert(execution.instance.id, execution);
    }

    pub fn get(&self, id: TaskInstanceId) -> Option<&RunningExecution> {
        self.busy.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskInstanceId) -> Option<&mut RunningExecution> {
        self.busy.get_mut(&id)
    }

    pub fn remove(&mut self, id: TaskInstanceId) -> Option<RunningExecution> {
        self.busy.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.busy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.busy.is_empty()
    }

    pub fn running(&self) -> impl Iterator<Item = &RunningExecution> {
        self.busy.values()
    }
}

/// Map an exit code to success, honoring `return.code.<N>.success` and
/// `return.code.default.success` parameter overrides.
pub(crate) fn success_for_code(
    params: &ParamSet,
    ctx: &dyn ParamsProvider,
    code: i32,
    default: bool,
) -> bool {
    if let Some(v) = params.value(&format!("return.code.{code}.success"), ctx) {
        return v == "true";
    }
    if let Some(v) = params.value("return.code.default.success", ctx) {
        return v == "true";
    }
    default
}

/// Apply clearsysenv/unsetenv/setenv to a command being built.
pub(crate) fn apply_env(cmd: &mut tokio::process::Command, ctx: &MeanContext) {
    let clear =
        ctx.params.value("clearsysenv", &ctx.instance).is_some_and(|v| v == "true");
    if clear {
        cmd.env_clear();
    } else {
        for pattern in &ctx.unsetenv {
            if pattern.contains('*') {
                for (name, _) in std::env::vars() {
                    if glob_match(pattern, &name) {
                        cmd.env_remove(&name);
                    }
                }
            } else {
                cmd.env_remove(pattern);
            }
        }
    }
    for (key, value) in &ctx.setenv {
        cmd.env(sanitize_env_key(key), ctx.params.evaluate(value, &ctx.instance));
    }
}

/// `*`-wildcard match; no other metacharacters.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some((b'*', rest)) => (0..=n.len()).any(|i| inner(rest, &n[i..])),
            Some((c, rest)) => n.split_first().is_some_and(|(nc, nrest)| nc == c && inner(rest, nrest)),
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/// Environment variable names tolerate only `[A-Za-z0-9_]`; everything
/// else (parameter dots, mostly) becomes an underscore.
pub(crate) fn sanitize_env_key(key: &str) -> String {
    key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

/// Per-execution stderr line filter.
///
/// Lines matching any configured regex are dropped. The first surviving
/// line raises the task's stderr alert; a successful run with no
/// surviving lines cancels it.
pub(crate) struct StderrFilter {
    task_id: String,
    patterns: Vec<Regex>,
    alerter: Arc<dyn Alerter>,
    hit: bool,
}

impl StderrFilter {
    pub(crate) fn new(task: &Task, alerter: Arc<dyn Alerter>) -> Self {
        let patterns = task
            .stderr_filters
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(task = %task.id, pattern = %p, %err, "invalid stderr filter");
                    None
                }
            })
            .collect();
        Self { task_id: task.id.clone(), patterns, alerter, hit: false }
    }

    pub(crate) fn observe(&mut self, line: &str) {
        if self.patterns.iter().any(|re| re.is_match(line)) {
            tracing::debug!(task = %self.task_id, line, "stderr line filtered");
            return;
        }
        tracing::warn!(task = %self.task_id, line, "stderr");
        if !self.hit {
            self.hit = true;
            self.alerter.raise(&alert::task_stderr(&self.task_id));
        }
    }

    /// Settle the alert once the run is over. Only a clean, successful
    /// run cancels it; a failed run keeps any earlier raise standing.
    pub(crate) fn finish(self, success: bool) {
        if success && !self.hit {
            self.alerter.cancel(&alert::task_stderr(&self.task_id));
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
