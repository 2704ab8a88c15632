// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource ledger and cluster target specs.

use crate::prelude::*;
use std::collections::HashMap;

fn needs(kind: &str, quantity: u32) -> HashMap<String, u32> {
    let mut resources = HashMap::new();
    resources.insert(kind.to_string(), quantity);
    resources
}

#[tokio::test]
async fn exhausted_host_queues_the_overflow() {
    let (handle, alerter) = spawn_scheduler();
    let config = SchedulerConfig::new()
        .with_host(Host::new("h1").with_resource("slots", 2))
        .with_task(
            Task::new("res.a", ExecutionMean::Local)
                .command("sleep 0.3")
                .target("h1")
                .resources(needs("slots", 2)),
        )
        .with_task(
            Task::new("res.b", ExecutionMean::Local)
                .command("sleep 0.1")
                .target("h1")
                .resources(needs("slots", 2)),
        );
    handle.activate_config(config).await.unwrap();

    handle.request_task("res.a", ParamSet::new(), false).await.unwrap();
    handle.request_task("res.b", ParamSet::new(), false).await.unwrap();
    wait_until(&handle, |v| {
        v.iter().any(|i| i.task_id == "res.a" && i.status == TaskInstanceStatus::Running)
            && v.iter().any(|i| i.task_id == "res.b" && i.status == TaskInstanceStatus::Queued)
    })
    .await;
    assert!(alerter.is_raised("resource.exhausted.h1"));

    // the freed slots admit the second task and settle the alert
    let views = wait_until(&handle, |v| finished(v, "res.b") == 1).await;
    let first = views.iter().find(|v| v.task_id == "res.a").unwrap();
    let second = views.iter().find(|v| v.task_id == "res.b").unwrap();
    assert!(second.started_at_ms.unwrap() >= first.finished_at_ms.unwrap());
    assert!(!alerter.is_raised("resource.exhausted.h1"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cluster_first_spills_to_the_next_member() {
    let (handle, _) = spawn_scheduler();
    let cluster = Cluster::new("web", ClusterBalancing::First)
        .with_host("h1")
        .with_host("h2");
    let task = Task::new("res.web", ExecutionMean::Local)
        .command("sleep 0.2")
        .target("web")
        .resources(needs("slots", 1))
        .max_instances(4);
    let config = SchedulerConfig::new()
        .with_host(Host::new("h1").with_resource("slots", 1))
        .with_host(Host::new("h2").with_resource("slots", 1))
        .with_cluster(cluster)
        .with_task(task);
    handle.activate_config(config).await.unwrap();

    handle.request_task("res.web", ParamSet::new(), false).await.unwrap();
    handle.request_task("res.web", ParamSet::new(), false).await.unwrap();

    let views = wait_until(&handle, |v| {
        v.iter().filter(|i| i.status == TaskInstanceStatus::Running).count() == 2
    })
    .await;
    let mut targets: Vec<String> = views
        .iter()
        .filter(|v| v.status == TaskInstanceStatus::Running)
        .filter_map(|v| v.target.clone())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["h1".to_string(), "h2".to_string()]);

    wait_until(&handle, |v| finished(v, "res.web") == 2).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cluster_each_fans_out_to_every_member() {
    let (handle, _) = spawn_scheduler();
    let cluster = Cluster::new("fleet", ClusterBalancing::Each)
        .with_host("h1")
        .with_host("h2")
        .with_host("h3");
    let task = Task::new("res.fan", ExecutionMean::DoNothing)
        .target("fleet")
        .max_instances(8);
    let config = SchedulerConfig::new()
        .with_host(Host::new("h1"))
        .with_host(Host::new("h2"))
        .with_host(Host::new("h3"))
        .with_cluster(cluster)
        .with_task(task);
    handle.activate_config(config).await.unwrap();

    let queued = handle.request_task("res.fan", ParamSet::new(), false).await.unwrap();
    assert_eq!(queued.len(), 3);
    let group = queued[0].group_id;
    assert!(queued.iter().all(|v| v.group_id == group), "fan-out shares one group");

    let views = wait_until(&handle, |v| finished(v, "res.fan") == 3).await;
    let mut targets: Vec<String> = views
        .iter()
        .filter(|v| v.status.is_finished())
        .filter_map(|v| v.target.clone())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["h1".to_string(), "h2".to_string(), "h3".to_string()]);
    handle.shutdown().await.unwrap();
}
