// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron trigger specs.
//!
//! Verify that a cron-triggered task is requested and executed without
//! any external request, and that triggers honor the enabled flag.

use crate::prelude::*;

fn every_second() -> CronTrigger {
    CronTrigger::new(CronExpression::parse("* * * * * *").unwrap())
}

#[tokio::test(start_paused = true)]
async fn cron_trigger_executes_the_task() {
    let (handle, _) = spawn_scheduler();
    let trigger = CronTrigger::new(CronExpression::parse("*/5 * * * * *").unwrap());
    let task = Task::new("cron.tick", ExecutionMean::DoNothing).cron_triggers(vec![trigger]);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    let views = wait_until(&handle, |v| succeeded(v, "cron.tick") >= 1).await;
    assert!(views.iter().all(|v| v.status != TaskInstanceStatus::Failure));

    let tasks = handle.tasks().await.unwrap();
    let stats = tasks[0].last_execution.unwrap();
    assert!(stats.success);
    assert_eq!(stats.return_code, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disabled_task_ignores_its_trigger() {
    let (handle, _) = spawn_scheduler();
    let config = SchedulerConfig::new()
        .with_task(
            Task::new("cron.off", ExecutionMean::DoNothing)
                .enabled(false)
                .cron_triggers(vec![every_second()]),
        )
        .with_task(
            Task::new("cron.on", ExecutionMean::DoNothing).cron_triggers(vec![every_second()]),
        );
    handle.activate_config(config).await.unwrap();

    let views = wait_until(&handle, |v| succeeded(v, "cron.on") >= 2).await;
    assert_eq!(finished(&views, "cron.off"), 0, "disabled task must not run");
    assert!(!views.iter().any(|v| v.task_id == "cron.off"));
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_rearms_triggers_with_the_new_schedule() {
    let (handle, _) = spawn_scheduler();
    let first = SchedulerConfig::new().with_task(
        Task::new("cron.a", ExecutionMean::DoNothing).cron_triggers(vec![every_second()]),
    );
    handle.activate_config(first).await.unwrap();
    wait_until(&handle, |v| succeeded(v, "cron.a") >= 1).await;

    // replacement config drops cron.a and introduces cron.b
    let second = SchedulerConfig::new().with_task(
        Task::new("cron.b", ExecutionMean::DoNothing).cron_triggers(vec![every_second()]),
    );
    handle.activate_config(second).await.unwrap();
    let before = handle
        .instances()
        .await
        .unwrap()
        .iter()
        .filter(|v| v.task_id == "cron.a")
        .count();

    let views = wait_until(&handle, |v| succeeded(v, "cron.b") >= 2).await;
    // stale timers for the removed task fire into a bumped generation
    // and are dropped, so cron.a gains at most one in-flight straggler
    let after = views.iter().filter(|v| v.task_id == "cron.a").count();
    assert!(after <= before + 1, "removed task kept firing: {before} -> {after}");
    handle.shutdown().await.unwrap();
}
