// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc op` - long-running operations on a host.
//!
//! Talks straight to the host's control service (these are not daemon
//! actions), using the profile's credentials on a one-shot bus connection.

use clap::Subcommand;
use uuid::Uuid;

use ph_bus::{BusClient, ClientConfig, RpcService};
use ph_lro::{wait, OpSummary};

use super::Ctx;
use crate::exit_error::ExitError;
use crate::output::{format_age, print_output, Table};

#[derive(Subcommand)]
pub enum OpCommand {
    /// Show one operation
    Get {
        op_id: String,
        #[arg(long)]
        host: Uuid,
    },
    /// Poll until the operation reaches a terminal status
    Wait {
        op_id: String,
        #[arg(long)]
        host: Uuid,
    },
    /// Request cooperative cancellation
    Cancel {
        op_id: String,
        #[arg(long)]
        host: Uuid,
    },
    /// List operations on a host
    List {
        #[arg(long)]
        host: Uuid,
        /// Include terminal operations
        #[arg(long)]
        all: bool,
    },
}

pub async fn op(command: OpCommand, ctx: &Ctx) -> Result<(), ExitError> {
    match command {
        OpCommand::Get { op_id, host } => {
            let client = connect(ctx).await?;
            let summary = fetch(ctx, &client, host, &op_id).await?;
            print_summary(ctx, &summary)
        }
        OpCommand::Wait { op_id, host } => {
            let client = connect(ctx).await?;
            let outcome = wait(
                || fetch(ctx, &client, host, &op_id),
                ctx.wait_timeout,
                ctx.poll_interval,
            )
            .await?;
            if outcome.timed_out {
                print_summary(ctx, &outcome.summary)?;
                return Err(ExitError::failure(format!(
                    "timed out after {:?} (status: {})",
                    ctx.wait_timeout, outcome.status
                )));
            }
            print_summary(ctx, &outcome.summary)
        }
        OpCommand::Cancel { op_id, host } => {
            let client = connect(ctx).await?;
            let result = RpcService::call(
                &client,
                &control_subject(host),
                "lroCancel",
                serde_json::json!({ "op_id": op_id }),
                ctx.rpc_timeout,
            )
            .await
            .map_err(|e| ExitError::failure(e.to_string()))?;
            let canceled = result["canceled"].as_bool().unwrap_or(false);
            print_output(ctx.format, &result, || {
                if canceled {
                    format!("Cancellation requested for {op_id}")
                } else {
                    format!("{op_id} was already finished")
                }
            })
            .map_err(ExitError::from)
        }
        OpCommand::List { host, all } => {
            let client = connect(ctx).await?;
            let result = RpcService::call(
                &client,
                &control_subject(host),
                "lroList",
                serde_json::json!({ "include_completed": all }),
                ctx.rpc_timeout,
            )
            .await
            .map_err(|e| ExitError::failure(e.to_string()))?;
            let summaries: Vec<OpSummary> = serde_json::from_value(result)
                .map_err(|e| ExitError::failure(e.to_string()))?;
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            print_output(ctx.format, &summaries, || {
                let mut table = Table::new(vec!["ID", "KIND", "STATUS", "AGE"]);
                for summary in &summaries {
                    table.row(vec![
                        summary.op_id.short(8).to_string(),
                        summary.kind.clone(),
                        summary.status.to_string(),
                        format_age(summary.created_at, now_ms),
                    ]);
                }
                if table.is_empty() {
                    "No operations".to_string()
                } else {
                    table.render()
                }
            })
            .map_err(ExitError::from)
        }
    }
}

fn control_subject(host: Uuid) -> String {
    format!("hosts.{host}.control")
}

async fn connect(ctx: &Ctx) -> Result<BusClient, ExitError> {
    let api = ctx
        .globals
        .api
        .clone()
        .ok_or_else(|| ExitError::failure("no api url configured (see --api / profiles)"))?;
    BusClient::connect(ClientConfig {
        url: api,
        bearer: ctx.globals.bearer.clone().or_else(|| ctx.globals.api_key.clone()),
        system_cookie: ctx.globals.hub_password.clone(),
        ..Default::default()
    })
    .await
    .map_err(|e| ExitError::failure(e.to_string()))
}

async fn fetch(
    ctx: &Ctx,
    client: &BusClient,
    host: Uuid,
    op_id: &str,
) -> Result<OpSummary, ExitError> {
    let result = RpcService::call(
        client,
        &control_subject(host),
        "lroGet",
        serde_json::json!({ "op_id": op_id }),
        ctx.rpc_timeout,
    )
    .await
    .map_err(|e| ExitError::failure(e.to_string()))?;
    serde_json::from_value(result)
        .map_err(|e| ExitError::failure(format!("malformed operation summary: {e}")))
}

fn print_summary(ctx: &Ctx, summary: &OpSummary) -> Result<(), ExitError> {
    print_output(ctx.format, summary, || {
        let mut lines = vec![
            format!("Operation: {}", summary.op_id),
            format!("Kind: {}", summary.kind),
            format!("Status: {}", summary.status),
            format!("Attempt: {}", summary.attempt),
        ];
        if let Some(error) = &summary.error {
            lines.push(format!("Error: {error}"));
        }
        if let Some(progress) = &summary.progress_summary {
            lines.push(format!("Progress: {progress}"));
        }
        lines.join("\n")
    })
    .map_err(ExitError::from)
}
