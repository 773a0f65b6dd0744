// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc daemon` - client-daemon management.

use clap::Subcommand;

use ph_wire::Action;

use super::{unwrap_response, Ctx};
use crate::exit_error::ExitError;
use crate::output::{print_output, OutputFormat};
use crate::paths::DaemonPaths;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Check whether the daemon is running
    Status,
    /// Stop the daemon
    Stop,
    /// Show recent daemon log lines
    Logs {
        /// Number of recent lines (default: 200)
        #[arg(short = 'n', long, default_value = "200")]
        limit: usize,
    },
}

pub async fn daemon(command: DaemonCommand, ctx: &Ctx) -> Result<(), ExitError> {
    match command {
        DaemonCommand::Status => status(ctx).await,
        DaemonCommand::Stop => stop(ctx).await,
        DaemonCommand::Logs { limit } => logs(ctx, limit),
    }
}

/// `cocalc ping` - round-trip latency through the daemon.
pub async fn ping(ctx: &Ctx) -> Result<(), ExitError> {
    let started = std::time::Instant::now();
    let response = ctx
        .client
        .request(&ctx.request(Action::Ping, None))
        .await
        .map_err(|e| ExitError::failure(e.to_string()))?;
    let elapsed = started.elapsed();
    let version = response
        .meta
        .as_ref()
        .and_then(|m| m.version.clone())
        .unwrap_or_else(|| "unknown".to_string());
    unwrap_response(response)?;
    let obj = serde_json::json!({
        "pong": true,
        "version": version,
        "round_trip_ms": elapsed.as_millis() as u64,
    });
    print_output(ctx.format, &obj, || {
        format!("pong ({version}, {:.1} ms)", elapsed.as_secs_f64() * 1000.0)
    })
    .map_err(ExitError::from)
}

async fn status(ctx: &Ctx) -> Result<(), ExitError> {
    // No auto-start: status of a stopped daemon is "not running", not a
    // freshly started one.
    let paths = DaemonPaths::resolve();
    let probe = crate::client::DaemonClient::new(paths).without_autostart();
    match probe.request(&ctx.request(Action::Ping, None)).await {
        Ok(response) => {
            let version = response
                .meta
                .and_then(|m| m.version)
                .unwrap_or_else(|| "unknown".to_string());
            let obj = serde_json::json!({ "status": "running", "version": version });
            print_output(ctx.format, &obj, || format!("Daemon running ({version})"))
                .map_err(ExitError::from)
        }
        Err(_) => {
            let obj = serde_json::json!({ "status": "not_running" });
            print_output(ctx.format, &obj, || "Daemon not running".to_string())
                .map_err(ExitError::from)
        }
    }
}

async fn stop(ctx: &Ctx) -> Result<(), ExitError> {
    let paths = DaemonPaths::resolve();
    let probe = crate::client::DaemonClient::new(paths).without_autostart();
    match probe.request(&ctx.request(Action::Shutdown, None)).await {
        Ok(_) => {
            if ctx.format == OutputFormat::Table {
                println!("Daemon stopped");
            }
            Ok(())
        }
        Err(e) if e.triggers_autostart() => {
            if ctx.format == OutputFormat::Table {
                println!("Daemon not running");
            }
            Ok(())
        }
        Err(e) => Err(ExitError::failure(e.to_string())),
    }
}

fn logs(ctx: &Ctx, limit: usize) -> Result<(), ExitError> {
    let paths = DaemonPaths::resolve();
    let content = match std::fs::read_to_string(&paths.log_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if ctx.format == OutputFormat::Table {
                println!("No log file at {}", paths.log_file.display());
            }
            return Ok(());
        }
        Err(e) => return Err(ExitError::failure(e.to_string())),
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    let tail = &lines[start..];
    let obj = serde_json::json!({
        "log_path": paths.log_file.display().to_string(),
        "lines": tail,
    });
    print_output(ctx.format, &obj, || tail.join("\n")).map_err(ExitError::from)
}
