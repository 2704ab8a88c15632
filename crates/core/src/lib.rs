// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cadence-core: configuration entities, time primitives and the shared
//! vocabulary of the cadence job scheduler.

pub mod macros;

pub mod alert;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod cron;
pub mod event;
pub mod host;
pub mod instance;
pub mod params;
pub mod steps;
pub mod task;

pub use calendar::{Calendar, CalendarRule};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    EventSubscription, LifecycleEvent, SchedulerConfig, SubscriptionAction, SubscriptionContext,
    TargetRef,
};
pub use cron::{CronExpression, CronParseError};
pub use event::{InstanceNotification, ItemChange, TaskNotification};
pub use host::{Cluster, ClusterBalancing, Host};
pub use instance::{TaskInstance, TaskInstanceId, TaskInstanceStatus, WorkflowParent};
pub use params::{NoContext, ParamSet, ParamsProvider};
pub use steps::{
    Step, StepEvent, StepGraph, StepGraphError, StepKind, StepTarget, WorkflowCronTrigger,
    WorkflowTransition, END_TARGET,
};
pub use task::{
    CronTrigger, ExecutionMean, NoticeTrigger, Task, TaskExecutionStats, TaskGroup,
};
