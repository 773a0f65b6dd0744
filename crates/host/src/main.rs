// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `project-host` — the node agent managing workspaces for a master.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ph_host::{env, lifecycle};

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,tungstenite=warn"));
    let log_dir = env::data_dir().join("log");
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "project-host.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let _guard = init_tracing();

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(e) => {
                error!(%e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                signal_shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        signal_shutdown.cancel();
    });

    if let Err(e) = lifecycle::run(shutdown).await {
        error!(%e, "host failed to start");
        std::process::exit(1);
    }
}
