// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler coordinator.
//!
//! One task owns all mutable scheduling state (config, queue, ledger,
//! executor pool, workflow instances) and is driven by a message loop.
//! [`SchedulerHandle`] is the public API: every externally visible call
//! is a message with a oneshot reply, so no lock is ever held across an
//! await point. Internal events (trigger firings, execution outcomes,
//! timers) arrive on the same channel; effects a handler wants processed
//! after itself go through a deferred queue rather than recursing.

mod activation;
mod admission;
mod completion;

use crate::alerts::{Alerter, NoopAlerter};
use crate::error::SchedulerError;
use crate::executor::{ExecutionOutcome, ExecutorPool};
use crate::queue::RequestQueue;
use crate::resources::ResourceLedger;
use crate::workflow::WorkflowInstance;
use cadence_core::{
    alert, Clock, InstanceNotification, ItemChange, LifecycleEvent, ParamSet, SchedulerConfig,
    SubscriptionContext, TaskInstance, TaskInstanceId, TaskNotification,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Finished instances kept for introspection.
const HISTORY_CAPACITY: usize = 128;
/// How far ahead a cron trigger is searched for its next occurrence.
const TRIGGER_HORIZON_DAYS: i64 = 366 * 4;
/// Buffer of the item-change broadcast; slow subscribers lose updates.
const CHANGE_BUFFER: usize = 256;

pub(crate) enum SchedulerMsg {
    ActivateConfig {
        config: SchedulerConfig,
        reply: oneshot::Sender<()>,
    },
    Request {
        task_id: String,
        params: ParamSet,
        force: bool,
        reply: oneshot::Sender<Result<Vec<InstanceNotification>, SchedulerError>>,
    },
    CancelRequest {
        id: TaskInstanceId,
        reply: oneshot::Sender<bool>,
    },
    Abort {
        id: TaskInstanceId,
        reply: oneshot::Sender<bool>,
    },
    EnableTask {
        task_id: String,
        enabled: bool,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    EnableAllTasks {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    PostNotice {
        notice: String,
        params: ParamSet,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<ItemChange>>,
    },
    Tasks {
        reply: oneshot::Sender<Vec<TaskNotification>>,
    },
    Instances {
        reply: oneshot::Sender<Vec<InstanceNotification>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    // internal events
    TriggerFired { task_id: String, trigger_idx: usize, generation: u64 },
    WorkflowTrigger { instance: TaskInstanceId, trigger_id: String },
    ExecutionFinished { id: TaskInstanceId, outcome: ExecutionOutcome },
    AbortTimeout { id: TaskInstanceId },
    Reevaluate,
    Housekeeping,
}

/// Clonable front end to the coordinator task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerMsg>,
}

impl SchedulerHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerMsg,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| SchedulerError::Terminated)?;
        rx.await.map_err(|_| SchedulerError::Terminated)
    }

    /// Replace the active configuration wholesale.
    pub async fn activate_config(&self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        self.call(|reply| SchedulerMsg::ActivateConfig { config, reply }).await
    }

    /// Submit a task request. Returns the created (queued) instances;
    /// cluster `each` targets fan out into several.
    pub async fn request_task(
        &self,
        task_id: impl Into<String>,
        params: ParamSet,
        force: bool,
    ) -> Result<Vec<InstanceNotification>, SchedulerError> {
        let task_id = task_id.into();
        self.call(|reply| SchedulerMsg::Request { task_id, params, force, reply }).await?
    }

    /// Cancel a queued request. False when the instance is not queued
    /// (already started, finished, or unknown).
    pub async fn cancel_request(&self, id: TaskInstanceId) -> Result<bool, SchedulerError> {
        self.call(|reply| SchedulerMsg::CancelRequest { id, reply }).await
    }

    /// Abort a running instance. False when it is not running or its
    /// mean never became abortable.
    pub async fn abort(&self, id: TaskInstanceId) -> Result<bool, SchedulerError> {
        self.call(|reply| SchedulerMsg::Abort { id, reply }).await
    }

    pub async fn enable_task(
        &self,
        task_id: impl Into<String>,
        enabled: bool,
    ) -> Result<(), SchedulerError> {
        let task_id = task_id.into();
        self.call(|reply| SchedulerMsg::EnableTask { task_id, enabled, reply }).await?
    }

    pub async fn enable_all_tasks(&self, enabled: bool) -> Result<(), SchedulerError> {
        self.call(|reply| SchedulerMsg::EnableAllTasks { enabled, reply }).await
    }

    /// Post a named notice, requesting every task subscribed to it.
    pub async fn post_notice(
        &self,
        notice: impl Into<String>,
        params: ParamSet,
    ) -> Result<(), SchedulerError> {
        let notice = notice.into();
        self.call(|reply| SchedulerMsg::PostNotice { notice, params, reply }).await
    }

    /// Item-change feed. Late subscribers see only subsequent changes.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<ItemChange>, SchedulerError> {
        self.call(|reply| SchedulerMsg::Subscribe { reply }).await
    }

    pub async fn tasks(&self) -> Result<Vec<TaskNotification>, SchedulerError> {
        self.call(|reply| SchedulerMsg::Tasks { reply }).await
    }

    /// Queued and running instances plus the bounded finished history.
    pub async fn instances(&self) -> Result<Vec<InstanceNotification>, SchedulerError> {
        self.call(|reply| SchedulerMsg::Instances { reply }).await
    }

    /// Stop the coordinator, cancelling running executions.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.call(|reply| SchedulerMsg::Shutdown { reply }).await
    }
}

pub struct Scheduler<C: Clock> {
    clock: C,
    config: SchedulerConfig,
    /// Bumped on every activation; timer events from older generations
    /// are ignored.
    generation: u64,
    queue: RequestQueue,
    ledger: ResourceLedger,
    pool: ExecutorPool,
    workflows: HashMap<TaskInstanceId, WorkflowInstance>,
    history: VecDeque<InstanceNotification>,
    alerter: Arc<dyn Alerter>,
    /// Alert keys currently raised, so raise/cancel are edge-triggered.
    raised: HashSet<String>,
    changes: broadcast::Sender<ItemChange>,
    tx: mpsc::UnboundedSender<SchedulerMsg>,
    rx: mpsc::UnboundedReceiver<SchedulerMsg>,
    deferred: VecDeque<SchedulerMsg>,
    reevaluate_pending: bool,
    started: bool,
    housekeeping: Option<JoinHandle<()>>,
    shutting_down: bool,
}

impl<C: Clock> Scheduler<C> {
    /// Spawn the coordinator task with no active configuration.
    pub fn spawn(clock: C, alerter: Arc<dyn Alerter>) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let config = SchedulerConfig::new();
        let scheduler = Self {
            clock,
            queue: RequestQueue::new(config.max_queued_requests()),
            pool: ExecutorPool::new(config.max_total_task_instances() as usize),
            config,
            generation: 0,
            ledger: ResourceLedger::new(),
            workflows: HashMap::new(),
            history: VecDeque::new(),
            alerter,
            raised: HashSet::new(),
            changes,
            tx: tx.clone(),
            rx,
            deferred: VecDeque::new(),
            reevaluate_pending: false,
            started: false,
            housekeeping: None,
            shutting_down: false,
        };
        tokio::spawn(scheduler.run());
        SchedulerHandle { tx }
    }

    /// Spawn with the default (log-only) alert sink.
    pub fn spawn_default(clock: C) -> SchedulerHandle {
        Self::spawn(clock, Arc::new(NoopAlerter))
    }

    async fn run(mut self) {
        while !self.shutting_down {
            let msg = match self.deferred.pop_front() {
                Some(msg) => msg,
                None => match self.rx.recv().await {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.handle(msg);
        }
        if let Some(handle) = self.housekeeping.take() {
            handle.abort();
        }
        for execution in self.pool.running() {
            execution.cancel.cancel();
        }
        tracing::info!("scheduler stopped");
    }

    fn handle(&mut self, msg: SchedulerMsg) {
        match msg {
            SchedulerMsg::ActivateConfig { config, reply } => {
                self.activate_config(config);
                let _ = reply.send(());
            }
            SchedulerMsg::Request { task_id, params, force, reply } => {
                let _ = reply.send(self.handle_request(&task_id, params, force));
            }
            SchedulerMsg::CancelRequest { id, reply } => {
                let _ = reply.send(self.handle_cancel_request(id));
            }
            SchedulerMsg::Abort { id, reply } => {
                let _ = reply.send(self.handle_abort(id));
            }
            SchedulerMsg::EnableTask { task_id, enabled, reply } => {
                let _ = reply.send(self.handle_enable(&task_id, enabled));
            }
            SchedulerMsg::EnableAllTasks { enabled, reply } => {
                self.handle_enable_all(enabled);
                let _ = reply.send(());
            }
            SchedulerMsg::PostNotice { notice, params, reply } => {
                self.handle_post_notice(&notice, params);
                let _ = reply.send(());
            }
            SchedulerMsg::Subscribe { reply } => {
                let _ = reply.send(self.changes.subscribe());
            }
            SchedulerMsg::Tasks { reply } => {
                let tasks = self.config.tasks.iter().map(TaskNotification::from).collect();
                let _ = reply.send(tasks);
            }
            SchedulerMsg::Instances { reply } => {
                let _ = reply.send(self.instance_views());
            }
            SchedulerMsg::Shutdown { reply } => {
                self.shutting_down = true;
                let _ = reply.send(());
            }
            SchedulerMsg::TriggerFired { task_id, trigger_idx, generation } => {
                self.handle_trigger_fired(&task_id, trigger_idx, generation);
            }
            SchedulerMsg::WorkflowTrigger { instance, trigger_id } => {
                self.handle_workflow_trigger(instance, &trigger_id);
            }
            SchedulerMsg::ExecutionFinished { id, outcome } => {
                self.handle_execution_finished(id, outcome);
            }
            SchedulerMsg::AbortTimeout { id } => {
                self.handle_abort_timeout(id);
            }
            SchedulerMsg::Reevaluate => {
                self.reevaluate_pending = false;
                self.run_start_pass();
            }
            SchedulerMsg::Housekeeping => {
                self.run_housekeeping();
            }
        }
    }

    fn handle_cancel_request(&mut self, id: TaskInstanceId) -> bool {
        let Some(mut instance) = self.queue.remove(id) else {
            return false;
        };
        instance.mark_canceled(self.clock.epoch_ms());
        tracing::info!(task = %instance.task.id, instance = %id, "queued request canceled");
        self.record_finished(&instance, None);
        true
    }

    fn handle_abort(&mut self, id: TaskInstanceId) -> bool {
        let Some(execution) = self.pool.get_mut(id) else {
            tracing::info!(instance = %id, "abort refused: not running");
            return false;
        };
        if !execution.instance.is_abortable() {
            tracing::info!(
                task = %execution.instance.task.id,
                instance = %id,
                "abort refused: instance is not abortable"
            );
            return false;
        }
        execution.state = crate::executor::ExecutorState::Aborting;
        execution.cancel.cancel();
        let is_workflow = self.workflows.contains_key(&id);
        tracing::info!(instance = %id, workflow = is_workflow, "abort requested");
        if is_workflow {
            self.abort_workflow(id);
        }
        true
    }

    fn handle_abort_timeout(&mut self, id: TaskInstanceId) {
        if self.pool.get(id).is_some() {
            tracing::warn!(instance = %id, "max duration exceeded, aborting");
            if !self.handle_abort(id) {
                tracing::warn!(instance = %id, "auto abort refused");
            }
        }
    }

    fn handle_enable(&mut self, task_id: &str, enabled: bool) -> Result<(), SchedulerError> {
        let Some(task) = self.config.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Err(SchedulerError::UnknownTask(task_id.to_string()));
        };
        if task.enabled != enabled {
            let old = TaskNotification::from(&*task);
            task.enabled = enabled;
            let change = ItemChange::task(task, Some(old));
            tracing::info!(task = task_id, enabled, "task toggled");
            let _ = self.changes.send(change);
        }
        if enabled {
            self.schedule_reevaluate();
        }
        Ok(())
    }

    fn handle_enable_all(&mut self, enabled: bool) {
        let ids: Vec<String> = self.config.tasks.iter().map(|t| t.id.clone()).collect();
        for id in ids {
            // per-task handler keeps change notifications uniform
            let _ = self.handle_enable(&id, enabled);
        }
    }

    fn handle_post_notice(&mut self, notice: &str, params: ParamSet) {
        tracing::info!(notice, "notice posted");
        let posted = Arc::new(params);
        let matching: Vec<(String, ParamSet)> = self
            .config
            .tasks
            .iter()
            .flat_map(|task| {
                task.notice_triggers
                    .iter()
                    .filter(|t| t.notice == notice)
                    .map(|t| (task.id.clone(), t.params.reparented(Arc::clone(&posted))))
            })
            .collect();
        for (task_id, overriding) in matching {
            if let Err(err) = self.handle_request(&task_id, overriding, false) {
                tracing::warn!(task = %task_id, notice, %err, "notice request failed");
            }
        }
        self.fire_subscriptions(LifecycleEvent::Notice, None, Some(notice));
    }

    fn handle_workflow_trigger(&mut self, instance: TaskInstanceId, trigger_id: &str) {
        let Some(workflow) = self.workflows.get_mut(&instance) else {
            return;
        };
        tracing::debug!(workflow = %instance, trigger = trigger_id, "workflow trigger fired");
        let effects = workflow.trigger_fired(trigger_id);
        self.apply_workflow_effects(instance, effects);
    }

    /// Debounced queue re-evaluation: many mutations in one batch of
    /// messages collapse into a single start pass.
    fn schedule_reevaluate(&mut self) {
        if !self.reevaluate_pending {
            self.reevaluate_pending = true;
            self.deferred.push_back(SchedulerMsg::Reevaluate);
        }
    }

    fn run_housekeeping(&mut self) {
        let now = self.clock.epoch_ms();
        let overdue: Vec<String> = self
            .pool
            .running()
            .filter(|e| {
                e.instance.task.max_expected_duration.is_some_and(|max| {
                    e.instance.duration_ms(now).is_some_and(|d| d > max.as_millis() as u64)
                })
            })
            .map(|e| e.instance.task.id.clone())
            .collect();
        for task_id in overdue {
            self.raise_alert(alert::task_toolong(&task_id));
        }
        // self-healing: a lost timer only delays a trigger until here
        self.generation += 1;
        self.arm_all_cron_triggers();
        self.schedule_reevaluate();
    }

    fn fire_subscriptions(
        &self,
        event: LifecycleEvent,
        instance: Option<&TaskInstance>,
        notice: Option<&str>,
    ) {
        let ctx = SubscriptionContext { event, instance, notice };
        for sub in self.config.subscriptions_for(event) {
            tracing::debug!(event = %event, subscription = %sub.label, "firing subscription");
            sub.action.fire(&ctx);
        }
    }

    /// Edge-triggered raise: only the first raise of a key reaches the sink.
    fn raise_alert(&mut self, key: String) {
        if self.raised.insert(key.clone()) {
            self.alerter.raise(&key);
        }
    }

    fn cancel_alert(&mut self, key: &str) {
        if self.raised.remove(key) {
            self.alerter.cancel(key);
        }
    }

    fn notify_instance(&mut self, instance: &TaskInstance, old: Option<InstanceNotification>) {
        let _ = self.changes.send(ItemChange::instance(instance, old));
    }

    /// Finished-instance bookkeeping shared by every completion path.
    fn record_finished(&mut self, instance: &TaskInstance, old: Option<InstanceNotification>) {
        let view = InstanceNotification::from(instance);
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(view);
        self.notify_instance(instance, old);
    }

    fn instance_views(&self) -> Vec<InstanceNotification> {
        let mut views: Vec<InstanceNotification> = self
            .queue
            .ids()
            .iter()
            .filter_map(|id| self.queue.get(*id))
            .map(InstanceNotification::from)
            .collect();
        views.extend(self.pool.running().map(|e| InstanceNotification::from(&e.instance)));
        views.extend(self.history.iter().cloned());
        views
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
