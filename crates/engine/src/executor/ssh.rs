// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote execution over ssh.
//!
//! The evaluated command runs on the target host through a hardened ssh
//! invocation. Without a pty the remote process would survive a local
//! kill, so the instance is only marked abortable when `ssh.allocate.pty`
//! asks for one.

use super::{local, ExecutionOutcome, MeanContext};

const DEFAULT_CONNECT_TIMEOUT_S: u32 = 10;

pub(crate) async fn run(ctx: &MeanContext) -> ExecutionOutcome {
    let Some(host) = ctx.instance.target.as_ref() else {
        tracing::error!(task = %ctx.instance.task.id, "ssh mean without a resolved target");
        return ExecutionOutcome::failed(-1);
    };
    let command = ctx.params.evaluate(&ctx.instance.task.command, &ctx.instance);
    if command.trim().is_empty() {
        tracing::error!(task = %ctx.instance.task.id, "empty command after evaluation");
        return ExecutionOutcome::failed(-1);
    }

    let pty = ctx.params.value("ssh.allocate.pty", &ctx.instance).is_some_and(|v| v == "true");
    let timeout = ctx
        .params
        .value("ssh.connect.timeout", &ctx.instance)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_S);

    let mut argv: Vec<String> = vec![
        "ssh".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "KbdInteractiveAuthentication=no".into(),
        "-o".into(),
        "PasswordAuthentication=no".into(),
        "-o".into(),
        format!("ConnectTimeout={timeout}"),
    ];
    if let Some(user) = ctx.params.value("ssh.user", &ctx.instance) {
        argv.push("-l".into());
        argv.push(user);
    }
    if let Some(port) = ctx.params.value("ssh.port", &ctx.instance) {
        argv.push("-p".into());
        argv.push(port);
    }
    if pty {
        // force a pty even without a local tty so the remote side dies with us
        argv.push("-t".into());
        argv.push("-t".into());
    }
    argv.push(host.hostname.clone());
    argv.push(command);

    local::run_argv(ctx, argv, pty).await
}
