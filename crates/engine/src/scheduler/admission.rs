// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission control: request intake and the start pass.
//!
//! Checks split in two. At enqueue time: unknown task/target, queue
//! capacity, alias discarding. At start time: enabled flag, instance
//! limit, executor slot, target resolution and the all-or-nothing
//! resource reservation. A request failing a start-time check stays
//! queued and is retried on the next re-evaluation.

use super::{Scheduler, SchedulerMsg};
use crate::error::SchedulerError;
use crate::executor::{self, ExecutorState, MeanContext, RunningExecution};
use crate::workflow::WorkflowInstance;
use cadence_core::{
    alert, Clock, ClusterBalancing, ExecutionMean, Host, InstanceNotification, LifecycleEvent,
    ParamSet, TargetRef, Task, TaskInstance, TaskInstanceId,
};
use std::sync::Arc;

/// Outcome of one start attempt during the start pass.
enum StartDecision {
    Started,
    /// Stays queued; retried on the next re-evaluation.
    Blocked,
    Canceled,
}

impl<C: Clock> Scheduler<C> {
    pub(super) fn handle_request(
        &mut self,
        task_id: &str,
        params: ParamSet,
        force: bool,
    ) -> Result<Vec<InstanceNotification>, SchedulerError> {
        let Some(task) = self.config.task(task_id) else {
            return Err(SchedulerError::UnknownTask(task_id.to_string()));
        };
        let task = task.clone();
        if !task.target.is_empty() && self.config.target(&task.target).is_none() {
            return Err(SchedulerError::UnknownTarget(task.target.clone(), task.id.clone()));
        }

        let now = self.clock.epoch_ms();
        let instances = self.fan_out(&task, params, force, now);

        // a fresh request supersedes older queued ones for tasks that
        // discard aliases, and always for disabled tasks
        if task.discard_aliases_on_start || !task.enabled {
            let group = instances.first().map(|i| i.group_id).unwrap_or_default();
            for mut stale in self.queue.remove_aliases(&task.id, group) {
                stale.mark_canceled(now);
                tracing::info!(task = %task.id, instance = %stale.id, "alias discarded");
                self.record_finished(&stale, None);
            }
        }

        let mut views = Vec::with_capacity(instances.len());
        for instance in instances {
            match self.queue.push(instance) {
                Ok(()) => {
                    self.cancel_alert(alert::SCHEDULER_MAX_QUEUED_REQUESTS);
                    let queued = self
                        .queue
                        .ids()
                        .last()
                        .and_then(|id| self.queue.get(*id))
                        .map(InstanceNotification::from);
                    if let Some(view) = queued {
                        tracing::info!(task = %task.id, instance = %view.id, force, "request queued");
                        views.push(view);
                    }
                }
                Err(mut rejected) => {
                    self.raise_alert(alert::SCHEDULER_MAX_QUEUED_REQUESTS.to_string());
                    rejected.mark_canceled(now);
                    tracing::warn!(task = %task.id, instance = %rejected.id, "queue full, request refused");
                    self.record_finished(&rejected, None);
                }
            }
        }
        for view in &views {
            if let Some(instance) = self.queue.get(view.id) {
                let change = cadence_core::ItemChange::instance(instance, None);
                let _ = self.changes.send(change);
            }
        }
        self.schedule_reevaluate();
        Ok(views)
    }

    /// Create the instance(s) for one request. Cluster `each` targets pin
    /// one instance per member host at request time, all sharing the first
    /// instance's group id.
    fn fan_out(
        &self,
        task: &Task,
        params: ParamSet,
        force: bool,
        now: u64,
    ) -> Vec<TaskInstance> {
        if let Some(TargetRef::Cluster(cluster)) = self.config.target(&task.target) {
            if cluster.balancing == ClusterBalancing::Each {
                let hosts: Vec<Host> = cluster
                    .hosts
                    .iter()
                    .filter_map(|id| match self.config.host(id) {
                        Some(host) => Some(host.clone()),
                        None => {
                            tracing::warn!(cluster = %cluster.id, host = %id, "unknown cluster member");
                            None
                        }
                    })
                    .collect();
                let mut group = None;
                return hosts
                    .into_iter()
                    .map(|host| {
                        let mut instance =
                            TaskInstance::new(task.clone(), params.clone(), force, now)
                                .pinned_to(host);
                        match group {
                            None => group = Some(instance.group_id),
                            Some(g) => instance = instance.in_group(g),
                        }
                        instance
                    })
                    .collect();
            }
        }
        vec![TaskInstance::new(task.clone(), params, force, now)]
    }

    /// Walk the queue in FIFO order, starting everything that can start.
    pub(super) fn run_start_pass(&mut self) {
        for id in self.queue.ids() {
            let _ = self.try_start_queued(id);
        }
    }

    fn try_start_queued(&mut self, id: TaskInstanceId) -> StartDecision {
        let Some(queued) = self.queue.get(id) else {
            return StartDecision::Canceled;
        };
        let force = queued.force;
        let task_id = queued.task.id.clone();

        // always check against the current definition, not the snapshot
        let Some(task) = self.config.task(&task_id).cloned() else {
            if let Some(mut orphan) = self.queue.remove(id) {
                orphan.mark_canceled(self.clock.epoch_ms());
                tracing::warn!(task = %task_id, instance = %id, "task vanished, request canceled");
                self.record_finished(&orphan, None);
            }
            return StartDecision::Canceled;
        };
        if !task.enabled {
            return StartDecision::Blocked;
        }
        if !force && task.running_instances() >= task.max_instances {
            self.raise_alert(alert::task_max_instances_reached(&task.id));
            return StartDecision::Blocked;
        }
        let temporary = !self.pool.has_free();
        if temporary && !force {
            self.raise_alert(alert::SCHEDULER_MAX_TOTAL_TASK_INSTANCES.to_string());
            return StartDecision::Blocked;
        }

        // a target that no longer resolves at all is a dead end, not a
        // transient shortage: finish the request as a failure
        let pinned = self.queue.get(id).is_some_and(|i| i.target.is_some());
        if !pinned && !task.target.is_empty() && self.config.target(&task.target).is_none() {
            if let Some(mut orphan) = self.queue.remove(id) {
                let now = self.clock.epoch_ms();
                orphan.mark_finished(false, -1, now);
                tracing::warn!(
                    task = %task.id,
                    instance = %id,
                    target = %task.target,
                    "target not configured, request failed"
                );
                self.record_finished(&orphan, None);
            }
            return StartDecision::Canceled;
        }

        let Some(target) = self.resolve_target(id, &task, force) else {
            return StartDecision::Blocked;
        };

        // all checks passed, claim the request
        let Some(mut instance) = self.queue.remove(id) else {
            return StartDecision::Canceled;
        };
        instance.task = task.clone();
        let old = InstanceNotification::from(&instance);
        task.instances.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        instance.mark_started(target, self.clock.epoch_ms());
        self.cancel_alert(&alert::task_max_instances_reached(&task.id));
        if !task.target.is_empty() {
            self.cancel_alert(&alert::resource_exhausted(&task.target));
        }
        tracing::info!(
            task = %task.id,
            instance = %instance.id,
            target = instance.target.as_ref().map(|h| h.id.as_str()).unwrap_or(""),
            temporary,
            "instance started"
        );
        self.fire_subscriptions(LifecycleEvent::Start, Some(&instance), None);
        self.notify_instance(&instance, Some(old));
        self.dispatch(instance, temporary);
        StartDecision::Started
    }

    /// Resolve the host the instance will run on, reserving its resources.
    /// `None` leaves the request queued with the matching alert raised.
    fn resolve_target(&mut self, id: TaskInstanceId, task: &Task, force: bool) -> Option<Host> {
        let pinned = self.queue.get(id).and_then(|i| i.target.clone());
        if let Some(pinned) = pinned {
            // cluster-each instance: host fixed at request time, but its
            // capacity is read from the current config
            let host = self.config.host(&pinned.id).cloned().unwrap_or(pinned);
            if self.ledger.try_reserve(&host, &task.resources, force) {
                return Some(host);
            }
            self.raise_alert(alert::resource_exhausted(&task.target));
            return None;
        }
        if task.target.is_empty() {
            // targetless tasks (donothing, workflows, plain local) run
            // unaccounted on the scheduler host
            return Some(Host::new("localhost"));
        }
        match self.config.target(&task.target) {
            Some(TargetRef::Host(host)) => {
                let host = host.clone();
                if self.ledger.try_reserve(&host, &task.resources, force) {
                    Some(host)
                } else {
                    self.raise_alert(alert::resource_exhausted(&task.target));
                    None
                }
            }
            Some(TargetRef::Cluster(cluster)) => {
                // balancing `first`: configured list order breaks ties
                let members: Vec<Host> = cluster
                    .hosts
                    .iter()
                    .filter_map(|id| self.config.host(id).cloned())
                    .collect();
                for host in members {
                    if self.ledger.try_reserve(&host, &task.resources, force) {
                        return Some(host);
                    }
                }
                self.raise_alert(alert::resource_exhausted(&task.target));
                None
            }
            None => {
                tracing::warn!(task = %task.id, target = %task.target, "target not configured");
                None
            }
        }
    }

    /// Hand a started instance to its mean (or the step runner).
    fn dispatch(&mut self, instance: TaskInstance, temporary: bool) {
        if instance.task.mean == ExecutionMean::Workflow {
            self.start_workflow(instance, temporary);
            return;
        }
        let mut execution = RunningExecution::new(instance.clone(), temporary);
        execution.state = ExecutorState::Running;
        let cancel = execution.cancel.clone();
        let ctx = MeanContext {
            params: instance.overriding_params.reparented(Arc::clone(&instance.task.params)),
            setenv: self
                .config
                .setenv
                .iter()
                .chain(instance.task.setenv.iter())
                .cloned()
                .collect(),
            unsetenv: self
                .config
                .unsetenv
                .iter()
                .chain(instance.task.unsetenv.iter())
                .cloned()
                .collect(),
            instance,
            cancel,
            alerter: Arc::clone(&self.alerter),
        };
        let id = ctx.instance.id;
        let tx = self.tx.clone();
        execution.mean_task = Some(tokio::spawn(async move {
            let outcome = executor::execute(ctx).await;
            let _ = tx.send(SchedulerMsg::ExecutionFinished { id, outcome });
        }));
        self.arm_abort_timer(&mut execution);
        self.pool.insert(execution);
    }

    fn start_workflow(&mut self, instance: TaskInstance, temporary: bool) {
        let id = instance.id;
        let Some(graph) = instance.task.steps.as_ref().map(Arc::clone) else {
            tracing::error!(task = %instance.task.id, "workflow task without steps");
            self.deferred.push_back(SchedulerMsg::ExecutionFinished {
                id,
                outcome: crate::executor::ExecutionOutcome::failed(-1),
            });
            let mut execution = RunningExecution::new(instance, temporary);
            execution.state = ExecutorState::Running;
            self.pool.insert(execution);
            return;
        };
        let mut execution = RunningExecution::new(instance.clone(), temporary);
        execution.state = ExecutorState::Running;
        // a workflow has no process to kill; aborting is always possible
        execution.instance.set_abortable(true);
        let cancel = execution.cancel.clone();
        self.arm_abort_timer(&mut execution);
        self.pool.insert(execution);

        let (workflow, effects) = WorkflowInstance::start(Arc::clone(&graph), id);
        self.workflows.insert(id, workflow);

        // internal cron triggers live exactly as long as the instance
        for trigger in graph.cron_triggers() {
            let trigger = trigger.clone();
            let tx = self.tx.clone();
            let clock = self.clock.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let now = clock.now_utc();
                    let horizon = now + chrono::Duration::days(super::TRIGGER_HORIZON_DAYS);
                    let Some(next) =
                        trigger.expression.next_after(now, horizon, trigger.calendar.as_ref())
                    else {
                        break;
                    };
                    let delay = (next - now).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => break,
                    }
                    let msg = SchedulerMsg::WorkflowTrigger {
                        instance: id,
                        trigger_id: trigger.id.clone(),
                    };
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            });
        }
        self.apply_workflow_effects(id, effects);
    }

    fn arm_abort_timer(&self, execution: &mut RunningExecution) {
        if let Some(limit) = execution.instance.task.max_duration_before_abort {
            let id = execution.instance.id;
            let tx = self.tx.clone();
            execution.abort_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let _ = tx.send(SchedulerMsg::AbortTimeout { id });
            }));
        }
    }

    /// Queue a subtask request on behalf of a workflow step. Bypasses the
    /// alias rules; capacity still applies.
    pub(super) fn request_subtask(
        &mut self,
        parent: TaskInstanceId,
        step: usize,
        task_id: &str,
    ) -> bool {
        let Some(task) = self.config.task(task_id).cloned() else {
            tracing::error!(workflow = %parent, task = task_id, "unknown subtask");
            return false;
        };
        // the workflow's overriding params flow down to its subtasks
        let overriding = self
            .pool
            .get(parent)
            .map(|e| e.instance.overriding_params.clone())
            .unwrap_or_default();
        let now = self.clock.epoch_ms();
        let instance = TaskInstance::new(task, overriding, false, now)
            .for_workflow(cadence_core::WorkflowParent { instance: parent, step });
        match self.queue.push(instance) {
            Ok(()) => {
                let change = self
                    .queue
                    .ids()
                    .last()
                    .and_then(|id| self.queue.get(*id))
                    .map(|i| cadence_core::ItemChange::instance(i, None));
                if let Some(change) = change {
                    let _ = self.changes.send(change);
                }
                self.schedule_reevaluate();
                true
            }
            Err(mut rejected) => {
                self.raise_alert(alert::SCHEDULER_MAX_QUEUED_REQUESTS.to_string());
                rejected.mark_canceled(now);
                tracing::warn!(workflow = %parent, task = task_id, "queue full, subtask refused");
                self.record_finished(&rejected, None);
                false
            }
        }
    }
}
