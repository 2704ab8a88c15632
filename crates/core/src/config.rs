// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler configuration snapshot.
//!
//! A `SchedulerConfig` is an immutable description of everything the engine
//! schedules: tasks, groups, targets, calendars, global parameters and the
//! subscription lists fired at lifecycle points. Activating a new snapshot
//! replaces the previous one wholesale; live bookkeeping cells are adopted
//! across generations by the engine.

use crate::calendar::Calendar;
use crate::host::{Cluster, Host};
use crate::instance::TaskInstance;
use crate::params::ParamSet;
use crate::task::{Task, TaskGroup};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_TOTAL_TASK_INSTANCES: u32 = 16;
pub const DEFAULT_MAX_QUEUED_REQUESTS: u32 = 128;
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Points in the scheduler's lifecycle where subscriptions fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// First config activation of the process.
    SchedulerStart,
    /// Every config activation, including the first.
    ConfigLoad,
    /// A task instance started executing.
    Start,
    /// A task instance finished successfully.
    Success,
    /// A task instance finished unsuccessfully.
    Failure,
    /// A notice was posted.
    Notice,
}

crate::simple_display! {
    LifecycleEvent {
        SchedulerStart => "onschedulerstart",
        ConfigLoad => "onconfigload",
        Start => "onstart",
        Success => "onsuccess",
        Failure => "onfailure",
        Notice => "onnotice",
    }
}

/// Context handed to a subscription action when it fires.
pub struct SubscriptionContext<'a> {
    pub event: LifecycleEvent,
    /// The instance the event is about, for start/success/failure.
    pub instance: Option<&'a TaskInstance>,
    /// The posted notice name, for notice events.
    pub notice: Option<&'a str>,
}

/// A side effect attached to a lifecycle event.
///
/// Implementations must not block; the engine fires them inline on its
/// coordinator task.
pub trait SubscriptionAction: Send + Sync {
    fn fire(&self, ctx: &SubscriptionContext<'_>);
}

impl<F> SubscriptionAction for F
where
    F: Fn(&SubscriptionContext<'_>) + Send + Sync,
{
    fn fire(&self, ctx: &SubscriptionContext<'_>) {
        self(ctx);
    }
}

/// One configured subscription: a label for logs and the action to run.
#[derive(Clone)]
pub struct EventSubscription {
    pub label: String,
    pub action: Arc<dyn SubscriptionAction>,
}

impl EventSubscription {
    pub fn new(label: impl Into<String>, action: Arc<dyn SubscriptionAction>) -> Self {
        Self { label: label.into(), action }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription").field("label", &self.label).finish_non_exhaustive()
    }
}

/// A scheduling target looked up by id.
#[derive(Debug, Clone, Copy)]
pub enum TargetRef<'a> {
    Host(&'a Host),
    Cluster(&'a Cluster),
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub tasks: Vec<Task>,
    pub groups: Vec<TaskGroup>,
    pub hosts: Vec<Host>,
    pub clusters: Vec<Cluster>,
    pub calendars: HashMap<String, Calendar>,
    pub max_total_task_instances: Option<u32>,
    pub max_queued_requests: Option<u32>,
    pub housekeeping_interval: Option<Duration>,
    /// Global parameters, the root of every task's inheritance chain.
    pub params: Arc<ParamSet>,
    pub setenv: Vec<(String, String)>,
    pub unsetenv: Vec<String>,
    subscriptions: HashMap<LifecycleEvent, Vec<EventSubscription>>,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    crate::setters! {
        set {
            setenv: Vec<(String, String)>,
            unsetenv: Vec<String>,
        }
    }

    pub fn with_max_total_task_instances(mut self, limit: u32) -> Self {
        self.max_total_task_instances = Some(limit);
        self
    }

    pub fn with_max_queued_requests(mut self, limit: u32) -> Self {
        self.max_queued_requests = Some(limit);
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = Some(interval);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_group(mut self, group: TaskGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_host(mut self, host: Host) -> Self {
        self.hosts.push(host);
        self
    }

    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_calendar(mut self, id: impl Into<String>, calendar: Calendar) -> Self {
        self.calendars.insert(id.into(), calendar);
        self
    }

    pub fn with_params(mut self, params: ParamSet) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_subscription(mut self, event: LifecycleEvent, sub: EventSubscription) -> Self {
        self.subscriptions.entry(event).or_default().push(sub);
        self
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&TaskGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn host(&self, id: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.id == id)
    }

    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    /// Resolve a target id, hosts taking precedence over clusters.
    pub fn target(&self, id: &str) -> Option<TargetRef<'_>> {
        if let Some(host) = self.host(id) {
            return Some(TargetRef::Host(host));
        }
        self.cluster(id).map(TargetRef::Cluster)
    }

    /// Subscriptions for one lifecycle event, in configuration order.
    pub fn subscriptions_for(&self, event: LifecycleEvent) -> &[EventSubscription] {
        self.subscriptions.get(&event).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn max_total_task_instances(&self) -> u32 {
        self.max_total_task_instances.unwrap_or(DEFAULT_MAX_TOTAL_TASK_INSTANCES)
    }

    pub fn max_queued_requests(&self) -> u32 {
        self.max_queued_requests.unwrap_or(DEFAULT_MAX_QUEUED_REQUESTS)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        self.housekeeping_interval.unwrap_or(DEFAULT_HOUSEKEEPING_INTERVAL)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;