// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local process execution.

use super::{apply_env, success_for_code, ExecutionOutcome, MeanContext, StderrFilter};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

pub(crate) async fn run(ctx: &MeanContext) -> ExecutionOutcome {
    let argv = ctx.params.evaluate_split(&ctx.instance.task.command, &ctx.instance);
    if argv.is_empty() {
        tracing::error!(task = %ctx.instance.task.id, "empty command after evaluation");
        return ExecutionOutcome::failed(-1);
    }
    run_argv(ctx, argv, true).await
}

/// Spawn `argv` and wait for it, streaming output and honoring the
/// cancellation token. `abortable` is latched only once the child is
/// actually running.
pub(crate) async fn run_argv(
    ctx: &MeanContext,
    argv: Vec<String>,
    abortable: bool,
) -> ExecutionOutcome {
    let task_id = ctx.instance.task.id.clone();
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    apply_env(&mut cmd, ctx);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(task = %task_id, command = %argv[0], %err, "spawn failed");
            return ExecutionOutcome::failed(-1);
        }
    };
    ctx.instance.set_abortable(abortable);

    let stdout_task = child.stdout.take().map(|out| {
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(task = %task_id, line, "stdout");
            }
        })
    });
    let stderr_task = child.stderr.take().map(|err| {
        let mut filter = StderrFilter::new(&ctx.instance.task, Arc::clone(&ctx.alerter));
        tokio::spawn(async move {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                filter.observe(&line);
            }
            filter
        })
    });

    let (status, aborted) = tokio::select! {
        status = child.wait() => (status, false),
        _ = ctx.cancel.cancelled() => {
            tracing::info!(task = %task_id, "killing process on abort");
            if let Err(err) = child.kill().await {
                tracing::warn!(task = %task_id, %err, "kill failed");
            }
            (child.wait().await, true)
        }
    };

    if let Some(handle) = stdout_task {
        let _ = handle.await;
    }

    let outcome = if aborted {
        ExecutionOutcome::failed(-1)
    } else {
        match status {
            Ok(status) => {
                // signal deaths carry no exit code
                let code = status.code().unwrap_or(-1);
                let success = success_for_code(&ctx.params, &ctx.instance, code, code == 0);
                ExecutionOutcome { success, return_code: code }
            }
            Err(err) => {
                tracing::error!(task = %task_id, %err, "wait failed");
                ExecutionOutcome::failed(-1)
            }
        }
    };
    if let Some(handle) = stderr_task {
        if let Ok(filter) = handle.await {
            filter.finish(outcome.success);
        }
    }
    outcome
}
