// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow instance state machine.
//!
//! A [`WorkflowInstance`] is pure state: feeding it an event returns the
//! effects the scheduler must perform (start a subtask, finish the
//! workflow). No I/O happens here, which keeps the join semantics
//! testable without a runtime.

use cadence_core::{StepEvent, StepGraph, StepKind, StepTarget, TaskInstanceId};
use std::collections::HashSet;
use std::sync::Arc;

/// What the scheduler must do after applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEffect {
    StartSubtask { step: usize, task_id: String },
    Finish { success: bool },
}

/// Runtime state of one step within one workflow instance.
#[derive(Debug)]
struct StepState {
    /// Latched on first activation; a step fires at most once per instance.
    ready: bool,
    /// Predecessor transition keys not yet fired. AND-joins wait for all
    /// of them, every other kind activates on the first.
    pending: HashSet<String>,
}

/// One running workflow.
pub struct WorkflowInstance {
    graph: Arc<StepGraph>,
    instance_id: TaskInstanceId,
    steps: Vec<StepState>,
    /// Subtask steps currently executing.
    active: HashSet<usize>,
    finished: bool,
}

impl WorkflowInstance {
    /// Build the per-step state and fire the start step.
    pub fn start(graph: Arc<StepGraph>, instance_id: TaskInstanceId) -> (Self, Vec<WorkflowEffect>) {
        let steps = (0..graph.steps().len())
            .map(|i| StepState { ready: false, pending: graph.predecessor_keys(i).into_iter().collect() })
            .collect();
        let mut wf =
            Self { graph, instance_id, steps, active: HashSet::new(), finished: false };
        let mut effects = Vec::new();
        let start = wf.graph.start_idx();
        wf.steps[start].ready = true;
        let source = wf.graph.steps()[start].local_id.clone();
        wf.emit(&source, StepEvent::Ready, &mut effects);
        (wf, effects)
    }

    pub fn instance_id(&self) -> TaskInstanceId {
        self.instance_id
    }

    pub fn graph(&self) -> &Arc<StepGraph> {
        &self.graph
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Apply a subtask outcome to its step.
    pub fn subtask_finished(&mut self, step: usize, success: bool) -> Vec<WorkflowEffect> {
        let mut effects = Vec::new();
        if step >= self.steps.len() {
            tracing::error!(workflow = %self.instance_id, step, "outcome for unknown step");
            return effects;
        }
        self.active.remove(&step);
        let event = if success { StepEvent::Success } else { StepEvent::Failure };
        let source = self.graph.steps()[step].local_id.clone();
        self.emit(&source, event, &mut effects);
        effects
    }

    /// Apply an internal cron trigger firing.
    pub fn trigger_fired(&mut self, trigger_id: &str) -> Vec<WorkflowEffect> {
        let mut effects = Vec::new();
        self.emit(trigger_id, StepEvent::Trigger, &mut effects);
        effects
    }

    fn emit(&mut self, source: &str, event: StepEvent, effects: &mut Vec<WorkflowEffect>) {
        if self.finished {
            return;
        }
        let graph = Arc::clone(&self.graph);
        let transitions: Vec<_> = graph.transitions_for(source, event).cloned().collect();
        if transitions.is_empty() {
            // A dead-end outcome with nothing else running ends the
            // workflow with that outcome; a graph without an explicit
            // $end still terminates.
            if matches!(event, StepEvent::Success | StepEvent::Failure) && self.active.is_empty() {
                self.finish(event != StepEvent::Failure, effects);
            }
            return;
        }
        for transition in transitions {
            match transition.target {
                StepTarget::End => self.finish(event != StepEvent::Failure, effects),
                StepTarget::Step(idx) => self.signal(idx, &transition.key, effects),
            }
        }
    }

    fn signal(&mut self, idx: usize, key: &str, effects: &mut Vec<WorkflowEffect>) {
        if self.finished {
            return;
        }
        let graph = Arc::clone(&self.graph);
        let kind = graph.steps()[idx].kind.clone();
        let state = &mut self.steps[idx];
        state.pending.remove(key);
        let fire = !state.ready
            && match kind {
                StepKind::AndJoin => state.pending.is_empty(),
                _ => true,
            };
        if !fire {
            return;
        }
        state.ready = true;
        match kind {
            StepKind::SubTask { task_id } => {
                self.active.insert(idx);
                effects.push(WorkflowEffect::StartSubtask { step: idx, task_id });
            }
            StepKind::AndJoin | StepKind::OrJoin => {
                let source = graph.steps()[idx].local_id.clone();
                self.emit(&source, StepEvent::Ready, effects);
            }
            StepKind::End => self.finish(true, effects),
            // start steps fire only at launch
            StepKind::Start => {}
        }
    }

    fn finish(&mut self, success: bool, effects: &mut Vec<WorkflowEffect>) {
        if !self.finished {
            self.finished = true;
            effects.push(WorkflowEffect::Finish { success });
        }
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
