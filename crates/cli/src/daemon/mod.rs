// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-user CLI daemon.
//!
//! One long-lived process serves newline-delimited JSON requests on a Unix
//! socket, amortizing bus authentication across many short CLI
//! invocations. `ping`/`shutdown` are handled here; `workspace.file.*`
//! actions go through an [`ActionExecutor`] (the bus-backed one in
//! production, fakes in tests).

pub mod ops;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ph_wire::{read_frame, write_frame, Action, Meta, ProtocolError, Request, Response};

use crate::paths::DaemonPaths;

pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What an action failed with; `code` feeds `meta.code` in JSON mode.
#[derive(Debug, Clone)]
pub struct OpFailure {
    pub message: String,
    pub code: Option<String>,
}

impl OpFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self { message: message.into(), code: Some(code.into()) }
    }
}

/// Executes `workspace.file.*` actions.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<serde_json::Value, OpFailure>;
}

/// Serve requests on the daemon socket until a `shutdown` action arrives.
pub async fn run(
    paths: &DaemonPaths,
    executor: Arc<dyn ActionExecutor>,
) -> Result<(), DaemonError> {
    paths.ensure_dir()?;
    // A leftover socket from a dead daemon blocks bind; remove it. A live
    // daemon would have answered the client's connect attempt already.
    if paths.socket.exists() {
        let _ = std::fs::remove_file(&paths.socket);
    }
    let listener = UnixListener::bind(&paths.socket)?;
    std::fs::write(&paths.pid_file, std::process::id().to_string())?;
    info!(socket = %paths.socket.display(), "cli daemon listening");

    let shutdown = CancellationToken::new();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => break,
        };
        match accepted {
            Ok((stream, _addr)) => {
                let executor = Arc::clone(&executor);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    handle_connection(reader, writer, executor, shutdown).await;
                });
            }
            Err(e) => error!(%e, "daemon accept error"),
        }
    }

    let _ = std::fs::remove_file(&paths.socket);
    let _ = std::fs::remove_file(&paths.pid_file);
    info!("cli daemon stopped");
    Ok(())
}

/// Serve one connection: many requests, one response each, until EOF.
pub(crate) async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    executor: Arc<dyn ActionExecutor>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut reader = BufReader::new(reader);
    loop {
        let request: Request = match read_frame(&mut reader).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => return,
            Err(e) => {
                debug!(%e, "unparseable daemon request");
                let _ = write_frame(&mut writer, &Response::failure(0, e.to_string())).await;
                return;
            }
        };

        let is_shutdown = request.action == Action::Shutdown;
        let response = dispatch(&request, executor.as_ref()).await;
        if write_frame(&mut writer, &response).await.is_err() {
            warn!("client went away mid-response");
            return;
        }
        if is_shutdown {
            shutdown.cancel();
            return;
        }
    }
}

async fn dispatch(request: &Request, executor: &dyn ActionExecutor) -> Response {
    let started = Instant::now();
    let meta = |code: Option<String>| Meta {
        version: Some(DAEMON_VERSION.to_string()),
        elapsed_ms: Some(started.elapsed().as_millis() as u64),
        code,
        api: request.globals.as_ref().and_then(|g| g.api.clone()),
        account_id: request.globals.as_ref().and_then(|g| g.account_id.clone()),
    };
    match request.action {
        Action::Ping => Response::success(request.id, serde_json::json!({ "pong": true }))
            .with_meta(meta(None)),
        Action::Shutdown => {
            Response::success(request.id, serde_json::json!({ "stopping": true }))
                .with_meta(meta(None))
        }
        _ => match executor.execute(request).await {
            Ok(data) => Response::success(request.id, data).with_meta(meta(None)),
            Err(failure) => Response::failure(request.id, failure.message.clone())
                .with_meta(meta(failure.code)),
        },
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
