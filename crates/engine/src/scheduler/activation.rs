// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration activation and cron trigger scheduling.
//!
//! Activating a snapshot replaces the previous one wholesale: parameter
//! chains are rewired, live bookkeeping cells adopted, queued requests
//! rebound against the new task definitions, the pool and queue resized,
//! and every cron trigger re-armed under a fresh generation so that
//! timers from the previous configuration fizzle when they fire.

use super::{Scheduler, SchedulerMsg, TRIGGER_HORIZON_DAYS};
use cadence_core::{alert, Clock, ItemChange, LifecycleEvent, SchedulerConfig, StepKind,
    TaskNotification};
use std::collections::HashMap;
use std::sync::Arc;

impl<C: Clock> Scheduler<C> {
    pub(super) fn activate_config(&mut self, mut config: SchedulerConfig) {
        tracing::info!(
            tasks = config.tasks.len(),
            hosts = config.hosts.len(),
            clusters = config.clusters.len(),
            "activating configuration"
        );

        // wire parameter inheritance: task -> group -> global
        let global = Arc::clone(&config.params);
        let group_params: HashMap<String, Arc<cadence_core::ParamSet>> = config
            .groups
            .iter()
            .map(|g| (g.id.clone(), Arc::new(g.params.reparented(Arc::clone(&global)))))
            .collect();
        for task in &mut config.tasks {
            let parent =
                group_params.get(&task.group).cloned().unwrap_or_else(|| Arc::clone(&global));
            task.params = Arc::new(task.params.reparented(parent));
        }

        // subtask steps with no target of their own run where the workflow runs
        let mut inherited: Vec<(String, String)> = Vec::new();
        for task in &config.tasks {
            let Some(graph) = task.steps.as_ref() else { continue };
            if task.target.is_empty() {
                continue;
            }
            for step in graph.steps() {
                if let StepKind::SubTask { task_id } = &step.kind {
                    inherited.push((task_id.clone(), task.target.clone()));
                }
            }
        }
        for (task_id, target) in inherited {
            if let Some(subtask) = config.tasks.iter_mut().find(|t| t.id == task_id) {
                if subtask.target.is_empty() {
                    subtask.target = target;
                }
            }
        }

        let previous = std::mem::replace(&mut self.config, config);
        for task in &mut self.config.tasks {
            if let Some(old) = previous.task(&task.id) {
                task.adopt_live_cells(old);
            }
        }

        self.pool.resize(self.config.max_total_task_instances() as usize);
        if self.pool.has_free() {
            self.cancel_alert(alert::SCHEDULER_MAX_TOTAL_TASK_INSTANCES);
        }
        self.queue.set_capacity(self.config.max_queued_requests());

        // rebind queued requests to the new definitions
        let now = self.clock.epoch_ms();
        for mut instance in self.queue.drain() {
            match self.config.task(&instance.task.id) {
                Some(task) => {
                    instance.task = task.clone();
                    // a pinned host must still exist
                    let pin_ok = match instance.target.as_ref() {
                        Some(pinned) => self.config.host(&pinned.id).is_some(),
                        None => true,
                    };
                    if !pin_ok {
                        instance.mark_canceled(now);
                        tracing::info!(instance = %instance.id, "pinned host gone, request canceled");
                        self.record_finished(&instance, None);
                        continue;
                    }
                    if let Err(mut rejected) = self.queue.push(instance) {
                        rejected.mark_canceled(now);
                        tracing::warn!(instance = %rejected.id, "request dropped by shrunken queue");
                        self.record_finished(&rejected, None);
                    }
                }
                None => {
                    instance.mark_canceled(now);
                    tracing::info!(
                        task = %instance.task.id,
                        instance = %instance.id,
                        "task removed from config, request canceled"
                    );
                    self.record_finished(&instance, None);
                }
            }
        }

        self.generation += 1;
        self.arm_all_cron_triggers();
        self.restart_housekeeping();

        for task in &self.config.tasks {
            let old = previous.task(&task.id).map(TaskNotification::from);
            let _ = self.changes.send(ItemChange::task(task, old));
        }

        if !self.started {
            self.started = true;
            self.fire_subscriptions(LifecycleEvent::SchedulerStart, None, None);
        }
        self.fire_subscriptions(LifecycleEvent::ConfigLoad, None, None);
        self.schedule_reevaluate();
    }

    pub(super) fn arm_all_cron_triggers(&mut self) {
        let pairs: Vec<(String, usize)> = self
            .config
            .tasks
            .iter()
            .flat_map(|t| (0..t.cron_triggers.len()).map(|i| (t.id.clone(), i)))
            .collect();
        for (task_id, idx) in pairs {
            self.arm_cron_trigger(&task_id, idx);
        }
    }

    /// Arm a one-shot timer for the trigger's next occurrence. The handler
    /// re-arms after firing, so each trigger has exactly one live timer
    /// per generation.
    pub(super) fn arm_cron_trigger(&self, task_id: &str, trigger_idx: usize) {
        let Some(trigger) =
            self.config.task(task_id).and_then(|t| t.cron_triggers.get(trigger_idx))
        else {
            return;
        };
        let now = self.clock.now_utc();
        let horizon = now + chrono::Duration::days(TRIGGER_HORIZON_DAYS);
        let Some(next) = trigger.expression.next_after(now, horizon, trigger.calendar.as_ref())
        else {
            tracing::warn!(
                task = task_id,
                expression = trigger.expression.source(),
                "no upcoming occurrence within the horizon"
            );
            return;
        };
        let delay = (next - now).to_std().unwrap_or_default();
        tracing::debug!(task = task_id, next = %next, "cron trigger armed");
        let msg = SchedulerMsg::TriggerFired {
            task_id: task_id.to_string(),
            trigger_idx,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    pub(super) fn handle_trigger_fired(
        &mut self,
        task_id: &str,
        trigger_idx: usize,
        generation: u64,
    ) {
        if generation != self.generation {
            tracing::debug!(task = task_id, generation, "stale trigger ignored");
            return;
        }
        let request = self.config.task(task_id).and_then(|task| {
            task.cron_triggers
                .get(trigger_idx)
                .map(|t| (task.enabled, t.params.clone()))
        });
        match request {
            Some((enabled, params)) => {
                if enabled {
                    tracing::info!(task = task_id, "cron trigger fired");
                    if let Err(err) = self.handle_request(task_id, params, false) {
                        tracing::warn!(task = task_id, %err, "trigger request failed");
                    }
                } else {
                    tracing::debug!(task = task_id, "cron trigger fired for disabled task");
                }
                self.arm_cron_trigger(task_id, trigger_idx);
            }
            None => {
                tracing::debug!(task = task_id, "trigger for vanished task");
            }
        }
    }

    fn restart_housekeeping(&mut self) {
        if let Some(handle) = self.housekeeping.take() {
            handle.abort();
        }
        let interval = self.config.housekeeping_interval();
        let tx = self.tx.clone();
        self.housekeeping = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the immediate first tick would double work just done during
            // activation
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(SchedulerMsg::Housekeeping).is_err() {
                    break;
                }
            }
        }));
    }
}
