// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared imports and helpers for the behavior specs.

pub use cadence_core::{
    Cluster, ClusterBalancing, CronExpression, CronTrigger, ExecutionMean, Host,
    InstanceNotification, ParamSet, SchedulerConfig, Step, StepEvent, StepGraph, SystemClock,
    Task, TaskInstanceStatus, WorkflowTransition, END_TARGET,
};
pub use cadence_engine::{RecordingAlerter, Scheduler, SchedulerHandle};
pub use std::sync::Arc;
pub use std::time::Duration;

/// Scheduler on the real clock with a recording alert sink.
pub fn spawn_scheduler() -> (SchedulerHandle, RecordingAlerter) {
    let alerter = RecordingAlerter::new();
    let handle = Scheduler::spawn(SystemClock, Arc::new(alerter.clone()));
    (handle, alerter)
}

/// Poll the instance views until `pred` holds, or fail the test.
pub async fn wait_until(
    handle: &SchedulerHandle,
    pred: impl Fn(&[InstanceNotification]) -> bool,
) -> Vec<InstanceNotification> {
    for _ in 0..1000 {
        let views = handle.instances().await.unwrap();
        if pred(&views) {
            return views;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Count the finished instances of one task among the views.
pub fn finished(views: &[InstanceNotification], task_id: &str) -> usize {
    views
        .iter()
        .filter(|v| v.task_id == task_id && v.status.is_finished())
        .count()
}

/// Count the successful instances of one task among the views.
pub fn succeeded(views: &[InstanceNotification], task_id: &str) -> usize {
    views
        .iter()
        .filter(|v| v.task_id == task_id && v.status == TaskInstanceStatus::Success)
        .count()
}
