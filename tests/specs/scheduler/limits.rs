// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency limit specs.
//!
//! Real child processes, real time: verify the per-task instance limit
//! serializes executions, the force flag punches through it, and the
//! request queue capacity raises its alert.

use crate::prelude::*;

#[tokio::test]
async fn instance_limit_serializes_executions() {
    let (handle, _) = spawn_scheduler();
    let task = Task::new("limit.one", ExecutionMean::Local)
        .command("sleep 0.2")
        .max_instances(1);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    for _ in 0..3 {
        handle.request_task("limit.one", ParamSet::new(), false).await.unwrap();
    }
    let views = wait_until(&handle, |v| finished(v, "limit.one") == 3).await;

    let mut spans: Vec<(u64, u64)> = views
        .iter()
        .filter(|v| v.status.is_finished())
        .map(|v| (v.started_at_ms.unwrap(), v.finished_at_ms.unwrap()))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "executions overlapped: {spans:?}");
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn force_runs_alongside_the_limit() {
    let (handle, _) = spawn_scheduler();
    let task = Task::new("limit.force", ExecutionMean::Local)
        .command("sleep 0.3")
        .max_instances(1);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    handle.request_task("limit.force", ParamSet::new(), false).await.unwrap();
    wait_until(&handle, |v| {
        v.iter().any(|i| i.status == TaskInstanceStatus::Running)
    })
    .await;
    handle.request_task("limit.force", ParamSet::new(), true).await.unwrap();

    wait_until(&handle, |v| {
        v.iter().filter(|i| i.status == TaskInstanceStatus::Running).count() == 2
    })
    .await;
    wait_until(&handle, |v| finished(v, "limit.force") == 2).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn queue_capacity_raises_and_settles_the_alert() {
    let (handle, alerter) = spawn_scheduler();
    // blocked at start time, so every request stays queued
    let task = Task::new("limit.q", ExecutionMean::DoNothing).max_instances(0);
    let config = SchedulerConfig::new().with_task(task).with_max_queued_requests(2);
    handle.activate_config(config).await.unwrap();

    for _ in 0..2 {
        let views = handle.request_task("limit.q", ParamSet::new(), false).await.unwrap();
        assert_eq!(views.len(), 1);
    }
    let refused = handle.request_task("limit.q", ParamSet::new(), false).await.unwrap();
    assert!(refused.is_empty());
    assert!(alerter.is_raised("scheduler.maxqueuedrequests.reached"));

    // freeing a slot settles the alert on the next accepted request
    let queued = handle.instances().await.unwrap();
    let id = queued.iter().find(|v| v.status == TaskInstanceStatus::Queued).unwrap().id;
    assert!(handle.cancel_request(id).await.unwrap());
    let views = handle.request_task("limit.q", ParamSet::new(), false).await.unwrap();
    assert_eq!(views.len(), 1);
    assert!(!alerter.is_raised("scheduler.maxqueuedrequests.reached"));
    handle.shutdown().await.unwrap();
}
