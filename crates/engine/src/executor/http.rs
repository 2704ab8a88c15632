// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request execution.
//!
//! The task command is the request path on the target host; method, port
//! and timeout come from parameters, headers from the env assignments.
//! The response status code doubles as the return code, so the usual
//! `return.code.<N>.success` overrides apply.

use super::{success_for_code, ExecutionOutcome, MeanContext};
use std::time::Duration;

const DEFAULT_TIMEOUT_S: u64 = 30;
const ERROR_BODY_PREFIX: usize = 512;

pub(crate) async fn run(ctx: &MeanContext) -> ExecutionOutcome {
    let task_id = ctx.instance.task.id.clone();
    let Some(host) = ctx.instance.target.as_ref() else {
        tracing::error!(task = %task_id, "http mean without a resolved target");
        return ExecutionOutcome::failed(-1);
    };

    let method = ctx
        .params
        .value("http.method", &ctx.instance)
        .unwrap_or_else(|| "GET".to_string())
        .to_ascii_uppercase();
    let Ok(method) = method.parse::<reqwest::Method>() else {
        tracing::error!(task = %task_id, method, "invalid http method");
        return ExecutionOutcome::failed(-1);
    };
    let port = ctx
        .params
        .value("http.port", &ctx.instance)
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(80);
    let timeout = ctx
        .params
        .value("http.timeout", &ctx.instance)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_S);

    let mut path = ctx.params.evaluate(&ctx.instance.task.command, &ctx.instance);
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    let url = format!("http://{}:{}{}", host.hostname, port, path);

    let client = match reqwest::Client::builder().timeout(Duration::from_secs(timeout)).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(task = %task_id, %err, "http client construction failed");
            return ExecutionOutcome::failed(-1);
        }
    };
    let mut request = client.request(method, &url);
    for (key, value) in &ctx.setenv {
        request = request.header(key.as_str(), ctx.params.evaluate(value, &ctx.instance));
    }

    ctx.instance.set_abortable(true);
    let response = tokio::select! {
        response = request.send() => response,
        _ = ctx.cancel.cancelled() => {
            tracing::info!(task = %task_id, url, "http request aborted");
            return ExecutionOutcome::failed(-1);
        }
    };

    match response {
        Ok(response) => {
            let status = response.status();
            let code = i32::from(status.as_u16());
            let success = success_for_code(&ctx.params, &ctx.instance, code, status.is_success());
            if !success {
                let body = response.text().await.unwrap_or_default();
                let prefix: String = body.chars().take(ERROR_BODY_PREFIX).collect();
                tracing::warn!(task = %task_id, url, code, body = %prefix, "http request failed");
            }
            ExecutionOutcome { success, return_code: code }
        }
        Err(err) => {
            tracing::error!(task = %task_id, url, %err, "http request error");
            ExecutionOutcome::failed(-1)
        }
    }
}
