// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("unknown target '{0}' for task '{1}'")]
    UnknownTarget(String, String),

    /// The coordinator task is gone; no further calls can be served.
    #[error("scheduler terminated")]
    Terminated,
}
