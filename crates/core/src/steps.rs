// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow step graphs: immutable per-task configuration.
//!
//! A workflow-mean task owns a fixed graph of steps connected by
//! transitions. Transitions are resolved to step indices once at graph
//! construction, so activating one at runtime is an index lookup rather
//! than a string-keyed map walk.

use crate::calendar::Calendar;
use crate::cron::CronExpression;
use thiserror::Error;

/// What a step does when it becomes ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Fires once, unconditionally, at workflow launch.
    Start,
    /// Runs one instance of the referenced task.
    SubTask { task_id: String },
    /// Becomes ready only when every predecessor transition has fired.
    AndJoin,
    /// Becomes ready on the first predecessor transition.
    OrJoin,
    /// Terminates the workflow with success.
    End,
}

crate::simple_display! {
    StepKind {
        Start => "start",
        SubTask { .. } => "subtask",
        AndJoin => "andjoin",
        OrJoin => "orjoin",
        End => "end",
    }
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Identifier local to the workflow.
    pub local_id: String,
    pub kind: StepKind,
}

impl Step {
    pub fn start(local_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), kind: StepKind::Start }
    }

    pub fn subtask(local_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), kind: StepKind::SubTask { task_id: task_id.into() } }
    }

    pub fn and_join(local_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), kind: StepKind::AndJoin }
    }

    pub fn or_join(local_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), kind: StepKind::OrJoin }
    }

    pub fn end(local_id: impl Into<String>) -> Self {
        Self { local_id: local_id.into(), kind: StepKind::End }
    }
}

/// Events a transition can key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepEvent {
    /// A step (start/join) became ready.
    Ready,
    /// A subtask instance finished successfully.
    Success,
    /// A subtask instance finished in failure.
    Failure,
    /// A subtask instance finished, either way. Satisfied transparently
    /// by both concrete outcomes.
    Finish,
    /// An internal cron trigger fired.
    Trigger,
}

crate::simple_display! {
    StepEvent {
        Ready => "onready",
        Success => "onsuccess",
        Failure => "onfailure",
        Finish => "onfinish",
        Trigger => "ontrigger",
    }
}

/// Target of a transition, as written in configuration.
pub const END_TARGET: &str = "$end";

/// A transition as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTransition {
    /// Source step local id, or an internal trigger id.
    pub source: String,
    pub event: StepEvent,
    /// Target step local id, or [`END_TARGET`].
    pub target: String,
}

impl WorkflowTransition {
    pub fn new(
        source: impl Into<String>,
        event: StepEvent,
        target: impl Into<String>,
    ) -> Self {
        Self { source: source.into(), event, target: target.into() }
    }
}

/// A transition with its target resolved to a step index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransition {
    /// Stable key identifying this transition in predecessor sets,
    /// `<source>:<event>:<target>`.
    pub key: String,
    pub source: String,
    pub event: StepEvent,
    pub target: StepTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTarget {
    Step(usize),
    /// The `$end` pseudo-step: terminates the workflow.
    End,
}

/// An internal cron trigger scheduling transitions by wall-clock time
/// within a running workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowCronTrigger {
    /// Identifier used as transition source, local to the workflow.
    pub id: String,
    pub expression: CronExpression,
    pub calendar: Option<Calendar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepGraphError {
    #[error("workflow has no start step")]
    MissingStart,
    #[error("workflow has {0} start steps, expected exactly one")]
    MultipleStarts(usize),
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("transition targets unknown step '{0}'")]
    UnknownTarget(String),
}

/// Validated, index-resolved workflow graph.
#[derive(Debug, Clone)]
pub struct StepGraph {
    steps: Vec<Step>,
    transitions: Vec<ResolvedTransition>,
    cron_triggers: Vec<WorkflowCronTrigger>,
    start: usize,
}

impl StepGraph {
    pub fn new(
        steps: Vec<Step>,
        transitions: Vec<WorkflowTransition>,
        cron_triggers: Vec<WorkflowCronTrigger>,
    ) -> Result<Self, StepGraphError> {
        let mut index = std::collections::HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.local_id.clone(), i).is_some() {
                return Err(StepGraphError::DuplicateStep(step.local_id.clone()));
            }
        }
        let starts: Vec<usize> = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == StepKind::Start)
            .map(|(i, _)| i)
            .collect();
        let start = match starts.as_slice() {
            [one] => *one,
            [] => return Err(StepGraphError::MissingStart),
            many => return Err(StepGraphError::MultipleStarts(many.len())),
        };
        let transitions = transitions
            .into_iter()
            .map(|t| {
                let target = if t.target == END_TARGET {
                    StepTarget::End
                } else {
                    StepTarget::Step(
                        *index
                            .get(&t.target)
                            .ok_or_else(|| StepGraphError::UnknownTarget(t.target.clone()))?,
                    )
                };
                Ok(ResolvedTransition {
                    key: format!("{}:{}:{}", t.source, t.event, t.target),
                    source: t.source,
                    event: t.event,
                    target,
                })
            })
            .collect::<Result<Vec<_>, StepGraphError>>()?;
        Ok(Self { steps, transitions, cron_triggers, start })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn start_idx(&self) -> usize {
        self.start
    }

    pub fn cron_triggers(&self) -> &[WorkflowCronTrigger] {
        &self.cron_triggers
    }

    /// Transitions activated when `source` emits `event`.
    ///
    /// A `Success` or `Failure` event also activates `Finish`-keyed
    /// transitions: status-agnostic joins are written once in config and
    /// matched against either concrete outcome.
    pub fn transitions_for<'a>(
        &'a self,
        source: &'a str,
        event: StepEvent,
    ) -> impl Iterator<Item = &'a ResolvedTransition> {
        let finish_applies = matches!(event, StepEvent::Success | StepEvent::Failure);
        self.transitions.iter().filter(move |t| {
            t.source == source
                && (t.event == event || (finish_applies && t.event == StepEvent::Finish))
        })
    }

    /// Predecessor transition keys targeting the given step.
    pub fn predecessor_keys(&self, step: usize) -> Vec<String> {
        self.transitions
            .iter()
            .filter(|t| t.target == StepTarget::Step(step))
            .map(|t| t.key.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;