// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cadence-engine: admission control, resource accounting, the executor
//! pool with its execution means, the workflow step runner and the
//! coordinator tying them together.

pub mod alerts;
pub mod error;
pub mod executor;
pub mod queue;
pub mod resources;
pub mod scheduler;
pub mod workflow;

pub use alerts::{AlertEvent, Alerter, NoopAlerter, RecordingAlerter};
pub use error::SchedulerError;
pub use executor::{ExecutionOutcome, ExecutorPool, ExecutorState};
pub use queue::RequestQueue;
pub use resources::ResourceLedger;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use workflow::{WorkflowEffect, WorkflowInstance};
