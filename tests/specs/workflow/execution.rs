// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow execution specs.
//!
//! End-to-end runs through the step graph: sequencing, failure routing,
//! joins, and aborting a workflow mid-flight.

use crate::prelude::*;

fn linear_graph() -> StepGraph {
    StepGraph::new(
        vec![
            Step::start("begin"),
            Step::subtask("build", "wf.build"),
            Step::subtask("deploy", "wf.deploy"),
        ],
        vec![
            WorkflowTransition::new("begin", StepEvent::Ready, "build"),
            WorkflowTransition::new("build", StepEvent::Success, "deploy"),
            WorkflowTransition::new("deploy", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn steps_run_in_sequence() {
    let (handle, _) = spawn_scheduler();
    let config = SchedulerConfig::new()
        .with_task(Task::new("wf.build", ExecutionMean::Local).command("sleep 0.1"))
        .with_task(Task::new("wf.deploy", ExecutionMean::Local).command("sleep 0.1"))
        .with_task(Task::new("wf.pipeline", ExecutionMean::Workflow).with_steps(linear_graph()));
    handle.activate_config(config).await.unwrap();

    handle.request_task("wf.pipeline", ParamSet::new(), false).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "wf.pipeline") == 1).await;

    assert_eq!(succeeded(&views, "wf.pipeline"), 1);
    let build = views.iter().find(|v| v.task_id == "wf.build").unwrap();
    let deploy = views.iter().find(|v| v.task_id == "wf.deploy").unwrap();
    assert!(deploy.started_at_ms.unwrap() >= build.finished_at_ms.unwrap());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failure_routes_to_the_recovery_step() {
    let (handle, _) = spawn_scheduler();
    let graph = StepGraph::new(
        vec![
            Step::start("begin"),
            Step::subtask("risky", "wf.fail"),
            Step::subtask("cleanup", "wf.ok"),
        ],
        vec![
            WorkflowTransition::new("begin", StepEvent::Ready, "risky"),
            WorkflowTransition::new("risky", StepEvent::Success, END_TARGET),
            WorkflowTransition::new("risky", StepEvent::Failure, "cleanup"),
            WorkflowTransition::new("cleanup", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap();
    let config = SchedulerConfig::new()
        .with_task(Task::new("wf.fail", ExecutionMean::Local).command("sh -c 'exit 1'"))
        .with_task(Task::new("wf.ok", ExecutionMean::DoNothing))
        .with_task(Task::new("wf.recover", ExecutionMean::Workflow).with_steps(graph));
    handle.activate_config(config).await.unwrap();

    handle.request_task("wf.recover", ParamSet::new(), false).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "wf.recover") == 1).await;

    // the handled failure does not fail the workflow
    assert_eq!(succeeded(&views, "wf.recover"), 1);
    assert_eq!(finished(&views, "wf.fail"), 1);
    assert_eq!(succeeded(&views, "wf.ok"), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unhandled_failure_fails_the_workflow() {
    let (handle, alerter) = spawn_scheduler();
    let graph = StepGraph::new(
        vec![Step::start("begin"), Step::subtask("only", "wf.fail")],
        vec![
            WorkflowTransition::new("begin", StepEvent::Ready, "only"),
            WorkflowTransition::new("only", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap();
    let config = SchedulerConfig::new()
        .with_task(Task::new("wf.fail", ExecutionMean::Local).command("sh -c 'exit 7'"))
        .with_task(Task::new("wf.doomed", ExecutionMean::Workflow).with_steps(graph));
    handle.activate_config(config).await.unwrap();

    handle.request_task("wf.doomed", ParamSet::new(), false).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "wf.doomed") == 1).await;

    let workflow = views.iter().find(|v| v.task_id == "wf.doomed").unwrap();
    assert_eq!(workflow.status, TaskInstanceStatus::Failure);
    assert!(alerter.is_raised("task.failure.wf.doomed"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn join_waits_for_both_branches() {
    let (handle, _) = spawn_scheduler();
    let graph = StepGraph::new(
        vec![
            Step::start("begin"),
            Step::subtask("left", "wf.left"),
            Step::subtask("right", "wf.right"),
            Step::and_join("meet"),
            Step::subtask("after", "wf.after"),
        ],
        vec![
            WorkflowTransition::new("begin", StepEvent::Ready, "left"),
            WorkflowTransition::new("begin", StepEvent::Ready, "right"),
            WorkflowTransition::new("left", StepEvent::Success, "meet"),
            WorkflowTransition::new("right", StepEvent::Success, "meet"),
            WorkflowTransition::new("meet", StepEvent::Ready, "after"),
            WorkflowTransition::new("after", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap();
    let config = SchedulerConfig::new()
        .with_task(Task::new("wf.left", ExecutionMean::Local).command("sleep 0.1"))
        .with_task(Task::new("wf.right", ExecutionMean::Local).command("sleep 0.3"))
        .with_task(Task::new("wf.after", ExecutionMean::DoNothing))
        .with_task(Task::new("wf.join", ExecutionMean::Workflow).with_steps(graph));
    handle.activate_config(config).await.unwrap();

    handle.request_task("wf.join", ParamSet::new(), false).await.unwrap();
    let views = wait_until(&handle, |v| finished(v, "wf.join") == 1).await;

    assert_eq!(succeeded(&views, "wf.join"), 1);
    let slow = views.iter().find(|v| v.task_id == "wf.right").unwrap();
    let after = views.iter().find(|v| v.task_id == "wf.after").unwrap();
    assert!(after.started_at_ms.unwrap() >= slow.finished_at_ms.unwrap());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn aborting_a_workflow_fails_it_and_stops_its_children() {
    let (handle, _) = spawn_scheduler();
    let graph = StepGraph::new(
        vec![Step::start("begin"), Step::subtask("long", "wf.long")],
        vec![
            WorkflowTransition::new("begin", StepEvent::Ready, "long"),
            WorkflowTransition::new("long", StepEvent::Success, END_TARGET),
        ],
        Vec::new(),
    )
    .unwrap();
    let config = SchedulerConfig::new()
        .with_task(Task::new("wf.long", ExecutionMean::Local).command("sleep 30"))
        .with_task(Task::new("wf.parent", ExecutionMean::Workflow).with_steps(graph));
    handle.activate_config(config).await.unwrap();

    let queued = handle.request_task("wf.parent", ParamSet::new(), false).await.unwrap();
    let id = queued[0].id;
    wait_until(&handle, |v| {
        v.iter().any(|i| i.task_id == "wf.long" && i.status == TaskInstanceStatus::Running)
    })
    .await;

    // give the child process a moment to spawn and latch abortability
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.abort(id).await.unwrap());

    // the workflow reports its failure first; the killed child's outcome
    // arrives on its own message, so wait for both
    let views = wait_until(&handle, |v| {
        finished(v, "wf.parent") == 1 && finished(v, "wf.long") == 1
    })
    .await;
    let parent = views.iter().find(|v| v.task_id == "wf.parent").unwrap();
    assert_eq!(parent.status, TaskInstanceStatus::Failure);
    let child = views.iter().find(|v| v.task_id == "wf.long").unwrap();
    assert!(child.status.is_finished(), "child did not stop: {:?}", child.status);
    handle.shutdown().await.unwrap();
}
