// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client with the auto-start protocol.
//!
//! A request is attempted once; on a connect-class failure the client
//! forks the daemon (`--daemon-mode`), polls `ping` every 100 ms up to a
//! deadline, then retries the original request once.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tracing::debug;

use ph_wire::{read_frame_timeout, write_frame, Action, ProtocolError, Request, Response};

use crate::paths::DaemonPaths;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const AUTOSTART_DEADLINE: Duration = Duration::from_secs(8);
pub const AUTOSTART_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timed out connecting to daemon")]
    ConnectTimeout,

    #[error("daemon did not become ready within {0:?}")]
    NeverReady(Duration),

    #[error("failed to start daemon: {0}")]
    Spawn(String),
}

impl ClientError {
    /// Connect-class failures that justify one auto-start attempt.
    pub fn triggers_autostart(&self) -> bool {
        match self {
            ClientError::ConnectTimeout => true,
            ClientError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            ),
            ClientError::Protocol(ProtocolError::Io(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            ),
            ClientError::Protocol(ProtocolError::ConnectionClosed) => true,
            _ => false,
        }
    }
}

pub struct DaemonClient {
    paths: DaemonPaths,
    request_timeout: Duration,
    /// `--no-daemon`: never fork, fail fast.
    autostart: bool,
}

impl DaemonClient {
    pub fn new(paths: DaemonPaths) -> Self {
        Self { paths, request_timeout: DEFAULT_REQUEST_TIMEOUT, autostart: true }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn without_autostart(mut self) -> Self {
        self.autostart = false;
        self
    }

    /// Send one request, auto-starting the daemon when necessary.
    pub async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        match self.send_once(request).await {
            Ok(response) => Ok(response),
            Err(e) if self.autostart && e.triggers_autostart() => {
                debug!(%e, "daemon unavailable, auto-starting");
                self.spawn_daemon()?;
                self.wait_ready().await?;
                self.send_once(request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.paths.socket))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);
        write_frame(&mut write, request).await?;
        Ok(read_frame_timeout(&mut read, self.request_timeout).await?)
    }

    fn spawn_daemon(&self) -> Result<(), ClientError> {
        self.paths.ensure_dir()?;
        let exe = std::env::current_exe().map_err(|e| ClientError::Spawn(e.to_string()))?;
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.log_file)?;
        std::process::Command::new(exe)
            .arg("--daemon-mode")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(log)
            .spawn()
            .map_err(|e| ClientError::Spawn(e.to_string()))?;
        Ok(())
    }

    /// Poll `ping` until the daemon answers or the deadline passes.
    async fn wait_ready(&self) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + AUTOSTART_DEADLINE;
        let ping = Request::new(0, Action::Ping);
        loop {
            if self.send_once(&ping).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::NeverReady(AUTOSTART_DEADLINE));
            }
            tokio::time::sleep(AUTOSTART_POLL).await;
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
