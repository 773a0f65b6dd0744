// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc` - CLI for project-host workspaces.
//!
//! Short-lived invocations talk to the per-user daemon (auto-started on
//! demand); `--daemon-mode` is the daemon itself.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod config;
mod daemon;
mod exit_error;
mod output;
mod paths;
mod workspace;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ph_wire::AuthGlobals;

use client::DaemonClient;
use commands::{auth, daemon as daemon_cmd, file, op, workspace as workspace_cmd, Ctx};
use exit_error::ExitError;
use output::OutputFormat;
use paths::DaemonPaths;

#[derive(Parser)]
#[command(name = "cocalc", version, about = "CoCalc project-host CLI")]
struct Cli {
    /// Shorthand for --output json
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Auth profile name
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Server URL, e.g. http://host:9100
    #[arg(long, global = true)]
    api: Option<String>,

    #[arg(long, global = true)]
    account_id: Option<String>,

    #[arg(long, global = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    cookie: Option<String>,

    #[arg(long, global = true)]
    bearer: Option<String>,

    #[arg(long, global = true)]
    hub_password: Option<String>,

    /// Overall wait budget (e.g. "30s", "2m")
    #[arg(long, global = true)]
    timeout: Option<String>,

    /// Per-RPC budget (e.g. "30s")
    #[arg(long, global = true)]
    rpc_timeout: Option<String>,

    /// Poll cadence for wait loops (e.g. "1s", "500ms")
    #[arg(long, global = true)]
    poll_ms: Option<String>,

    /// Bypass the daemon; connect directly per invocation
    #[arg(long, global = true)]
    no_daemon: bool,

    /// Run as the background daemon (internal)
    #[arg(long, hide = true)]
    daemon_mode: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Workspace file operations
    #[command(subcommand)]
    File(file::FileCommand),
    /// Client-daemon management
    #[command(subcommand)]
    Daemon(daemon_cmd::DaemonCommand),
    /// Auth profile management
    #[command(subcommand)]
    Auth(auth::AuthCommand),
    /// Workspace context for this directory
    #[command(subcommand)]
    Workspace(workspace_cmd::WorkspaceCommand),
    /// Long-running operations on a host
    #[command(subcommand)]
    Op(op::OpCommand),
    /// Round-trip check through the daemon
    Ping,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.daemon_mode {
        return run_daemon_mode().await;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cocalc: {e}");
            let code = u8::try_from(e.code).unwrap_or(1);
            ExitCode::from(code.max(1))
        }
    }
}

async fn run_daemon_mode() -> ExitCode {
    let paths = DaemonPaths::resolve();
    let executor = Arc::new(daemon::ops::BusFileOps::new(daemon::ops::DEFAULT_RPC_TIMEOUT));
    match daemon::run(&paths, executor).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cocalc daemon: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    let format = if cli.json { OutputFormat::Json } else { cli.output };

    let parse_duration = |flag: &Option<String>, default: Duration| -> Result<Duration, ExitError> {
        match flag {
            Some(raw) => ph_core::parse_duration_ms(raw)
                .map(Duration::from_millis)
                .map_err(|e| ExitError::failure(e.to_string())),
            None => Ok(default),
        }
    };
    let rpc_timeout = parse_duration(&cli.rpc_timeout, client::DEFAULT_REQUEST_TIMEOUT)?;
    let wait_timeout = parse_duration(&cli.timeout, Duration::from_secs(300))?;
    let poll_interval = parse_duration(&cli.poll_ms, Duration::from_secs(1))?;

    let overrides = AuthGlobals {
        profile: None,
        api: cli.api.clone(),
        account_id: cli.account_id.clone(),
        api_key: cli.api_key.clone(),
        cookie: cli.cookie.clone(),
        bearer: cli.bearer.clone(),
        hub_password: cli.hub_password.clone(),
    };
    let auth_config = config::load_auth_config(&config::default_config_path())
        .map_err(|e| ExitError::failure(e.to_string()))?;
    let globals = config::resolve_globals(&auth_config, cli.profile.as_deref(), &overrides)
        .map_err(|e| ExitError::failure(e.to_string()))?;

    let ctx = Ctx {
        format,
        globals,
        client: DaemonClient::new(DaemonPaths::resolve()).with_request_timeout(rpc_timeout),
        rpc_timeout,
        wait_timeout,
        poll_interval,
        no_daemon: cli.no_daemon,
    };

    match cli.command {
        Some(Command::File(command)) => file::file(command, &ctx).await,
        Some(Command::Daemon(command)) => daemon_cmd::daemon(command, &ctx).await,
        Some(Command::Auth(command)) => auth::auth(command, &ctx),
        Some(Command::Workspace(command)) => workspace_cmd::workspace(command, &ctx),
        Some(Command::Op(command)) => op::op(command, &ctx).await,
        Some(Command::Ping) => daemon_cmd::ping(&ctx).await,
        None => Err(ExitError::failure("no command given (try --help)")),
    }
}
