// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared finishing path.
//!
//! Every execution outcome, aborted or not, local process or workflow,
//! funnels through [`Scheduler::handle_execution_finished`]: stamp the
//! end, release resources, settle alerts, fire subscriptions, publish the
//! change, route workflow effects, then re-evaluate the queue.

use super::{Scheduler, SchedulerMsg};
use crate::executor::{ExecutionOutcome, ExecutorState};
use crate::workflow::WorkflowEffect;
use cadence_core::{alert, Clock, InstanceNotification, LifecycleEvent, TaskExecutionStats,
    TaskInstanceId};
use std::sync::atomic::Ordering;

impl<C: Clock> Scheduler<C> {
    pub(super) fn handle_execution_finished(
        &mut self,
        id: TaskInstanceId,
        outcome: ExecutionOutcome,
    ) {
        let Some(mut execution) = self.pool.remove(id) else {
            // duplicate or post-shutdown report
            tracing::debug!(instance = %id, "outcome for unknown execution");
            return;
        };
        execution.state = ExecutorState::Finishing;
        execution.disarm_abort_timer();
        execution.cancel.cancel();
        self.workflows.remove(&id);
        if self.pool.has_free() {
            self.cancel_alert(alert::SCHEDULER_MAX_TOTAL_TASK_INSTANCES);
        }

        let now = self.clock.epoch_ms();
        let mut instance = execution.instance;
        let old = InstanceNotification::from(&instance);
        instance.mark_finished(outcome.success, outcome.return_code, now);
        let task = instance.task.clone();
        if task.instances.fetch_sub(1, Ordering::SeqCst) == 0 {
            // underflow would wedge the instance limit forever
            task.instances.store(0, Ordering::SeqCst);
            tracing::error!(task = %task.id, "instance counter underflow");
        }
        if !task.resources.is_empty() && !task.target.is_empty() {
            if let Some(host) = instance.target.clone() {
                self.ledger.release(&host, &task.resources);
                self.cancel_alert(&alert::resource_exhausted(&task.target));
            }
        }

        let duration = instance.duration_ms(now).unwrap_or(0);
        *task.last_execution.lock() = Some(TaskExecutionStats {
            finished_at_ms: now,
            success: outcome.success,
            return_code: outcome.return_code,
            duration_ms: duration,
        });

        self.cancel_alert(&alert::task_toolong(&task.id));
        if task.min_expected_duration.is_some_and(|min| duration < min.as_millis() as u64) {
            self.raise_alert(alert::task_tooshort(&task.id));
        }
        if outcome.success {
            self.cancel_alert(&alert::task_failure(&task.id));
            self.fire_subscriptions(LifecycleEvent::Success, Some(&instance), None);
        } else {
            self.raise_alert(alert::task_failure(&task.id));
            self.fire_subscriptions(LifecycleEvent::Failure, Some(&instance), None);
        }

        tracing::info!(
            task = %task.id,
            instance = %id,
            success = outcome.success,
            return_code = outcome.return_code,
            duration_ms = duration,
            "instance finished"
        );
        self.record_finished(&instance, Some(old));

        if let Some(parent) = instance.workflow_parent {
            let effects = match self.workflows.get_mut(&parent.instance) {
                Some(workflow) => workflow.subtask_finished(parent.step, outcome.success),
                // aborted or already-finished workflow
                None => Vec::new(),
            };
            self.apply_workflow_effects(parent.instance, effects);
        }
        self.schedule_reevaluate();
    }

    pub(super) fn apply_workflow_effects(
        &mut self,
        workflow_id: TaskInstanceId,
        effects: Vec<WorkflowEffect>,
    ) {
        for effect in effects {
            match effect {
                WorkflowEffect::StartSubtask { step, task_id } => {
                    if !self.request_subtask(workflow_id, step, &task_id) {
                        // a subtask that cannot even queue fails the step
                        if let Some(workflow) = self.workflows.get_mut(&workflow_id) {
                            let more = workflow.subtask_finished(step, false);
                            self.apply_workflow_effects(workflow_id, more);
                        }
                    }
                }
                WorkflowEffect::Finish { success } => {
                    let outcome = if success {
                        ExecutionOutcome::succeeded()
                    } else {
                        ExecutionOutcome::failed(-1)
                    };
                    self.deferred
                        .push_back(SchedulerMsg::ExecutionFinished { id: workflow_id, outcome });
                }
            }
        }
    }

    /// Tear down an aborting workflow: stop its state machine, cancel its
    /// queued subtasks, abort its running ones, then report the workflow
    /// itself as failed.
    pub(super) fn abort_workflow(&mut self, id: TaskInstanceId) {
        self.workflows.remove(&id);

        let queued: Vec<TaskInstanceId> = self
            .queue
            .ids()
            .into_iter()
            .filter(|qid| {
                self.queue
                    .get(*qid)
                    .and_then(|i| i.workflow_parent)
                    .is_some_and(|p| p.instance == id)
            })
            .collect();
        let now = self.clock.epoch_ms();
        for qid in queued {
            if let Some(mut instance) = self.queue.remove(qid) {
                instance.mark_canceled(now);
                self.record_finished(&instance, None);
            }
        }

        let running: Vec<TaskInstanceId> = self
            .pool
            .running()
            .filter(|e| e.instance.workflow_parent.is_some_and(|p| p.instance == id))
            .map(|e| e.instance.id)
            .collect();
        for rid in running {
            if let Some(execution) = self.pool.get_mut(rid) {
                if execution.instance.is_abortable() {
                    execution.state = ExecutorState::Aborting;
                    execution.cancel.cancel();
                } else {
                    // the subtask runs to completion; its outcome finds
                    // the workflow already gone and is dropped
                    tracing::warn!(workflow = %id, instance = %rid, "subtask not abortable");
                }
            }
        }

        self.deferred.push_back(SchedulerMsg::ExecutionFinished {
            id,
            outcome: ExecutionOutcome::failed(-1),
        });
    }
}
