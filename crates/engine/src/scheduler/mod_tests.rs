// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::alerts::RecordingAlerter;
use cadence_core::{
    CronExpression, CronTrigger, ExecutionMean, FakeClock, Host, NoticeTrigger, ParamSet, Step,
    StepEvent, StepGraph, SystemClock, Task, TaskInstanceStatus, WorkflowTransition, END_TARGET,
};
use std::time::Duration;

fn setup() -> (SchedulerHandle, RecordingAlerter) {
    let alerter = RecordingAlerter::new();
    let handle = Scheduler::spawn(SystemClock, Arc::new(alerter.clone()));
    (handle, alerter)
}

async fn wait_until(
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

fn finished(views: &[InstanceNotification], task_id: &str) -> usize {
    views.iter().filter(|v| v.task_id == task_id && v.status.is_finished()).count()
}

#[tokio::test]
async fn unknown_task_is_refused() {
    let (handle, _) = setup();
    handle.activate_config(SchedulerConfig::new()).await.unwrap();
    let err = handle.request_task("app.missing", ParamSet::new(), false).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownTask(_)));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn donothing_request_runs_to_success() {
    let (handle, _) = setup();
    let config =
        SchedulerConfig::new().with_task(Task::new("app.noop", ExecutionMean::DoNothing));
    handle.activate_config(config).await.unwrap();

    let views = handle.request_task("app.noop", ParamSet::new(), false).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, TaskInstanceStatus::Queued);

    let views = wait_until(&handle, |v| finished(v, "app.noop") == 1).await;
    let done = views.iter().find(|v| v.status.is_finished()).unwrap();
    assert_eq!(done.status, TaskInstanceStatus::Success);
    assert_eq!(done.return_code, 0);
    assert!(done.started_at_ms.is_some());

    let tasks = handle.tasks().await.unwrap();
    let stats = tasks[0].last_execution.unwrap();
    assert!(stats.success);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn max_instances_serializes_executions() {
    let (handle, _) = setup();
    let task = Task::new("app.slow", ExecutionMean::Local)
        .command("sleep 0.2")
        .max_instances(1);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    handle.request_task("app.slow", ParamSet::new(), false).await.unwrap();
    handle.request_task("app.slow", ParamSet::new(), false).await.unwrap();

    let views = handle.instances().await.unwrap();
    let running =
        views.iter().filter(|v| v.status == TaskInstanceStatus::Running).count();
    assert!(running <= 1, "never more than one running instance");

    let views = wait_until(&handle, |v| finished(v, "app.slow") == 2).await;
    // the second run started only after the first finished
    let mut spans: Vec<(u64, u64)> = views
        .iter()
        .filter(|v| v.status.is_finished())
        .map(|v| (v.started_at_ms.unwrap(), v.finished_at_ms.unwrap()))
        .collect();
    spans.sort_unstable();
    assert!(spans[1].0 >= spans[0].1, "executions overlapped: {spans:?}");
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn queue_full_raises_the_alert_and_cancels_the_request() {
    let (handle, alerter) = setup();
    // enabled but never startable, so requests pile up in the queue
    let task = Task::new("app.idle", ExecutionMean::DoNothing).max_instances(0);
    let config =
        SchedulerConfig::new().with_task(task).with_max_queued_requests(1);
    handle.activate_config(config).await.unwrap();

    let first = handle.request_task("app.idle", ParamSet::new(), false).await.unwrap();
    assert_eq!(first.len(), 1);
    let second = handle.request_task("app.idle", ParamSet::new(), false).await.unwrap();
    assert!(second.is_empty(), "rejected request creates no queued instance");
    assert!(alerter.is_raised("scheduler.maxqueuedrequests.reached"));

    let views = handle.instances().await.unwrap();
    assert_eq!(
        views.iter().filter(|v| v.status == TaskInstanceStatus::Queued).count(),
        1
    );
    assert_eq!(
        views.iter().filter(|v| v.status == TaskInstanceStatus::Canceled).count(),
        1
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn new_request_discards_queued_aliases_of_a_disabled_task() {
    let (handle, _) = setup();
    let task = Task::new("app.held", ExecutionMean::DoNothing).enabled(false);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    for _ in 0..3 {
        let views = handle.request_task("app.held", ParamSet::new(), false).await.unwrap();
        assert_eq!(views.len(), 1);
    }

    let views = handle.instances().await.unwrap();
    assert_eq!(
        views.iter().filter(|v| v.status == TaskInstanceStatus::Queued).count(),
        1,
        "only the newest request survives"
    );
    assert_eq!(
        views.iter().filter(|v| v.status == TaskInstanceStatus::Canceled).count(),
        2
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn pool_exhaustion_alert_settles_when_a_slot_frees() {
    let (handle, alerter) = setup();
    let config = SchedulerConfig::new()
        .with_task(Task::new("app.hold", ExecutionMean::Local).command("sleep 0.3"))
        .with_task(Task::new("app.wait", ExecutionMean::DoNothing))
        .with_max_total_task_instances(1);
    handle.activate_config(config).await.unwrap();

    handle.request_task("app.hold", ParamSet::new(), false).await.unwrap();
    wait_until(&handle, |v| v.iter().any(|i| i.status == TaskInstanceStatus::Running)).await;
    handle.request_task("app.wait", ParamSet::new(), false).await.unwrap();

    wait_until(&handle, |v| {
        v.iter().any(|i| i.task_id == "app.wait" && i.status == TaskInstanceStatus::Queued)
    })
    .await;
    assert!(alerter.is_raised("scheduler.maxtotaltaskinstances.reached"));

    wait_until(&handle, |v| finished(v, "app.hold") == 1 && finished(v, "app.wait") == 1).await;
    assert!(!alerter.is_raised("scheduler.maxtotaltaskinstances.reached"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn disabled_task_stays_queued_until_enabled() {
    let (handle, _) = setup();
    let task = Task::new("app.gate", ExecutionMean::DoNothing).enabled(false);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    handle.request_task("app.gate", ParamSet::new(), false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let views = handle.instances().await.unwrap();
    assert_eq!(views[0].status, TaskInstanceStatus::Queued);

    handle.enable_task("app.gate", true).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "app.gate") == 1).await;
    assert!(views.iter().any(|v| v.status == TaskInstanceStatus::Success));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn resource_exhaustion_serializes_and_settles_the_alert() {
    let (handle, alerter) = setup();
    let mut resources = std::collections::HashMap::new();
    resources.insert("slots".to_string(), 1_u32);
    let task = Task::new("app.res", ExecutionMean::Local)
        .command("sleep 0.2")
        .target("h1")
        .resources(resources)
        .max_instances(4);
    let config = SchedulerConfig::new()
        .with_host(Host::new("h1").with_resource("slots", 1))
        .with_task(task);
    handle.activate_config(config).await.unwrap();

    handle.request_task("app.res", ParamSet::new(), false).await.unwrap();
    handle.request_task("app.res", ParamSet::new(), false).await.unwrap();

    wait_until(&handle, |v| {
        v.iter().any(|i| i.status == TaskInstanceStatus::Running)
            && v.iter().any(|i| i.status == TaskInstanceStatus::Queued)
    })
    .await;
    assert!(alerter.is_raised("resource.exhausted.h1"));

    wait_until(&handle, |v| finished(v, "app.res") == 2).await;
    assert!(!alerter.is_raised("resource.exhausted.h1"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancel_request_removes_a_queued_instance() {
    let (handle, _) = setup();
    let task = Task::new("app.idle", ExecutionMean::DoNothing).enabled(false);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    let views = handle.request_task("app.idle", ParamSet::new(), false).await.unwrap();
    assert!(handle.cancel_request(views[0].id).await.unwrap());
    assert!(!handle.cancel_request(views[0].id).await.unwrap());

    let views = handle.instances().await.unwrap();
    assert_eq!(views[0].status, TaskInstanceStatus::Canceled);
    assert_eq!(views[0].return_code, -1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn abort_kills_a_running_local_instance() {
    let (handle, _) = setup();
    let task = Task::new("app.long", ExecutionMean::Local).command("sleep 30");
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    let views = handle.request_task("app.long", ParamSet::new(), false).await.unwrap();
    let id = views[0].id;
    wait_until(&handle, |v| v.iter().any(|i| i.status == TaskInstanceStatus::Running)).await;

    // the abortable latch may trail the running status by a moment
    let mut aborted = false;
    for _ in 0..100 {
        if handle.abort(id).await.unwrap() {
            aborted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(aborted);

    let views = wait_until(&handle, |v| finished(v, "app.long") == 1).await;
    let done = views.iter().find(|v| v.status.is_finished()).unwrap();
    assert_eq!(done.status, TaskInstanceStatus::Failure);
    assert_eq!(done.return_code, -1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn force_bypasses_the_instance_limit() {
    let (handle, _) = setup();
    let task = Task::new("app.noop", ExecutionMean::DoNothing).max_instances(0);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    handle.request_task("app.noop", ParamSet::new(), false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let views = handle.instances().await.unwrap();
    assert_eq!(views[0].status, TaskInstanceStatus::Queued, "regular request blocked");

    handle.request_task("app.noop", ParamSet::new(), true).await.unwrap();
    wait_until(&handle, |v| finished(v, "app.noop") == 1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn notice_requests_every_subscribed_task() {
    let (handle, _) = setup();
    let config = SchedulerConfig::new()
        .with_task(
            Task::new("app.a", ExecutionMean::DoNothing)
                .notice_triggers(vec![NoticeTrigger::new("deploy")]),
        )
        .with_task(
            Task::new("app.b", ExecutionMean::DoNothing)
                .notice_triggers(vec![NoticeTrigger::new("deploy")]),
        )
        .with_task(Task::new("app.c", ExecutionMean::DoNothing));
    handle.activate_config(config).await.unwrap();

    handle.post_notice("deploy", ParamSet::new()).await.unwrap();
    let views = wait_until(&handle, |v| {
        finished(v, "app.a") == 1 && finished(v, "app.b") == 1
    })
    .await;
    assert_eq!(finished(&views, "app.c"), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn workflow_runs_subtasks_and_finishes() {
    let (handle, _) = setup();
    let graph = StepGraph::new(
        vec![Step::start("s"), Step::subtask("one", "app.one"), Step::subtask("two", "app.two")],
        vec![
            WorkflowTransition::new("s", StepEvent::Ready, "one"),
            WorkflowTransition::new("one", StepEvent::Success, "two"),
            WorkflowTransition::new("two", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap();
    let config = SchedulerConfig::new()
        .with_task(Task::new("app.one", ExecutionMean::DoNothing))
        .with_task(Task::new("app.two", ExecutionMean::DoNothing))
        .with_task(Task::new("app.flow", ExecutionMean::Workflow).with_steps(graph));
    handle.activate_config(config).await.unwrap();

    handle.request_task("app.flow", ParamSet::new(), false).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "app.flow") == 1).await;
    let flow = views.iter().find(|v| v.task_id == "app.flow" && v.status.is_finished()).unwrap();
    assert_eq!(flow.status, TaskInstanceStatus::Success);
    assert_eq!(finished(&views, "app.one"), 1);
    assert_eq!(finished(&views, "app.two"), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reload_cancels_requests_for_removed_tasks() {
    let (handle, _) = setup();
    let task = Task::new("app.gone", ExecutionMean::DoNothing).enabled(false);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();
    handle.request_task("app.gone", ParamSet::new(), false).await.unwrap();

    handle.activate_config(SchedulerConfig::new()).await.unwrap();
    let views = handle.instances().await.unwrap();
    assert_eq!(views[0].status, TaskInstanceStatus::Canceled);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cron_trigger_fires_and_requests_the_task() {
    let alerter = RecordingAlerter::new();
    let handle = Scheduler::spawn(SystemClock, Arc::new(alerter));
    let trigger = CronTrigger::new(CronExpression::parse("* * * * * *").unwrap());
    let task =
        Task::new("app.tick", ExecutionMean::DoNothing).cron_triggers(vec![trigger]);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    wait_until(&handle, |v| finished(v, "app.tick") >= 1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failure_raises_and_success_cancels_the_task_alert() {
    let (handle, alerter) = setup();
    let params = ParamSet::new().with("code", "1");
    let task = Task::new("app.flaky", ExecutionMean::Local)
        .command("sh -c 'exit %code'")
        .with_params(params);
    handle.activate_config(SchedulerConfig::new().with_task(task)).await.unwrap();

    handle.request_task("app.flaky", ParamSet::new(), false).await.unwrap();
    wait_until(&handle, |v| finished(v, "app.flaky") == 1).await;
    assert!(alerter.is_raised("task.failure.app.flaky"));

    let fix = ParamSet::new().with("code", "0");
    handle.request_task("app.flaky", fix, false).await.unwrap();
    wait_until(&handle, |v| finished(v, "app.flaky") == 2).await;
    assert!(!alerter.is_raised("task.failure.app.flaky"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn subscriptions_fire_at_lifecycle_points() {
    use cadence_core::{EventSubscription, SubscriptionContext};
    use parking_lot::Mutex;

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |label: &'static str, seen: &Arc<Mutex<Vec<String>>>| {
        let seen = Arc::clone(seen);
        EventSubscription::new(label, Arc::new(move |ctx: &SubscriptionContext<'_>| {
            let detail = ctx
                .instance
                .map(|i| i.task.id.clone())
                .or_else(|| ctx.notice.map(str::to_string))
                .unwrap_or_default();
            seen.lock().push(format!("{label}:{detail}"));
        }))
    };
    let (handle, _) = setup();
    let config = SchedulerConfig::new()
        .with_task(Task::new("app.noop", ExecutionMean::DoNothing))
        .with_subscription(LifecycleEvent::SchedulerStart, record("boot", &seen))
        .with_subscription(LifecycleEvent::ConfigLoad, record("load", &seen))
        .with_subscription(LifecycleEvent::Start, record("start", &seen))
        .with_subscription(LifecycleEvent::Success, record("ok", &seen));
    handle.activate_config(config.clone()).await.unwrap();
    handle.request_task("app.noop", ParamSet::new(), false).await.unwrap();
    wait_until(&handle, |v| finished(v, "app.noop") == 1).await;

    // second activation repeats onconfigload but not onschedulerstart
    handle.activate_config(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let seen = seen.lock().clone();
    assert_eq!(seen.iter().filter(|s| s.as_str() == "boot:").count(), 1);
    assert_eq!(seen.iter().filter(|s| s.as_str() == "load:").count(), 2);
    assert!(seen.contains(&"start:app.noop".to_string()));
    assert!(seen.contains(&"ok:app.noop".to_string()));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn item_changes_are_broadcast_to_subscribers() {
    let (handle, _) = setup();
    let config = SchedulerConfig::new().with_task(Task::new("app.noop", ExecutionMean::DoNothing));
    handle.activate_config(config).await.unwrap();
    let mut rx = handle.subscribe().await.unwrap();

    handle.request_task("app.noop", ParamSet::new(), false).await.unwrap();
    let mut statuses = Vec::new();
    for _ in 0..10 {
        match rx.recv().await {
            Ok(ItemChange::TaskInstance { new, .. }) => {
                statuses.push(new.status);
                if new.status.is_finished() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert_eq!(
        statuses,
        vec![
            TaskInstanceStatus::Queued,
            TaskInstanceStatus::Running,
            TaskInstanceStatus::Success,
        ]
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn fake_clock_timestamps_the_instance() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_700_000_000_000);
    let handle = Scheduler::spawn(clock, Arc::new(RecordingAlerter::new()));
    let config = SchedulerConfig::new().with_task(Task::new("app.noop", ExecutionMean::DoNothing));
    handle.activate_config(config).await.unwrap();

    let views = handle.request_task("app.noop", ParamSet::new(), false).await.unwrap();
    assert_eq!(views[0].submitted_at_ms, 1_700_000_000_000);
    handle.shutdown().await.unwrap();
}
