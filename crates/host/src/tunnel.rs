// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reverse-SSH tunnel supervisor.
//!
//! Keeps one `ssh` child alive holding two remote forwards (HTTP + SSH
//! ingress) and one local forward to the master's REST port. Registration
//! runs before every (re)connect so port reassignments on the master side
//! are adopted; failures back off exponentially with jitter.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("registration failed: {0}")]
    Registration(String),

    #[error("keygen failed: {0}")]
    Keygen(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tunnel parameters assigned by the master. The numeric ports may change
/// across re-registrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTunnelConfig {
    pub sshd_host: String,
    pub sshd_port: u16,
    pub ssh_user: String,
    pub http_tunnel_port: u16,
    pub ssh_tunnel_port: u16,
    pub rest_port: u16,
}

/// The master's `registerOnPremTunnel` RPC.
#[async_trait]
pub trait TunnelRegistrar: Send + Sync {
    async fn register_tunnel(
        &self,
        host_id: Uuid,
        public_key: &str,
    ) -> Result<ReverseTunnelConfig, TunnelError>;
}

const BACKOFF_BASE_MS: u64 = 2_000;
const BACKOFF_CAP_MS: u64 = 60_000;
const BACKOFF_JITTER: f64 = 0.2;

/// Exponential back-off without jitter: 2 s, 4 s, 8 s … capped at 60 s.
pub fn backoff_base_ms(attempt: u32) -> u64 {
    BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10)).min(BACKOFF_CAP_MS)
}

/// Back-off with ±20 % jitter applied.
pub fn backoff_ms(attempt: u32) -> u64 {
    let base = backoff_base_ms(attempt) as f64;
    let factor = rand::thread_rng().gen_range(1.0 - BACKOFF_JITTER..=1.0 + BACKOFF_JITTER);
    (base * factor) as u64
}

/// Recognize the two stderr shapes OpenSSH emits when a forward's local
/// endpoint refuses connections.
pub fn is_forward_failure(line: &str) -> bool {
    (line.contains("connect_to 127.0.0.1 port ") && line.contains("failed"))
        || line.contains("open failed: connect failed: Connection refused")
}

/// The exact ssh invocation for a config.
pub fn ssh_args(
    config: &ReverseTunnelConfig,
    key_path: &Path,
    local_http_port: u16,
    local_ssh_port: u16,
    rest_local_port: u16,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        key_path.display().to_string(),
        "-N".to_string(),
        "-T".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=30".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-p".to_string(),
        config.sshd_port.to_string(),
        format!("{}@{}", config.ssh_user, config.sshd_host),
        "-R".to_string(),
        format!("0.0.0.0:{}:127.0.0.1:{}", config.http_tunnel_port, local_http_port),
        "-R".to_string(),
        format!("0.0.0.0:{}:127.0.0.1:{}", config.ssh_tunnel_port, local_ssh_port),
        "-L".to_string(),
        format!("127.0.0.1:{}:127.0.0.1:{}", rest_local_port, config.rest_port),
    ]
}

/// Generate the Ed25519 key pair once; return the public half.
pub async fn ensure_keypair(
    key_path: &Path,
    keygen_program: &str,
) -> Result<String, TunnelError> {
    let pub_path = key_path.with_extension("pub");
    if !key_path.exists() {
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| TunnelError::Io { path: parent.to_path_buf(), source })?;
        }
        let output = Command::new(keygen_program)
            .args(["-t", "ed25519", "-N", "", "-q", "-f"])
            .arg(key_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TunnelError::Keygen(e.to_string()))?;
        if !output.status.success() {
            return Err(TunnelError::Keygen(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        info!(path = %key_path.display(), "generated tunnel key pair");
    }
    let public_key = std::fs::read_to_string(&pub_path)
        .map_err(|source| TunnelError::Io { path: pub_path, source })?;
    Ok(public_key.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub host_id: Uuid,
    pub key_path: PathBuf,
    pub local_http_port: u16,
    pub local_ssh_port: u16,
    pub rest_local_port: u16,
    pub ssh_program: String,
    pub keygen_program: String,
    pub restart_delay: Duration,
    pub forward_failure_debounce: Duration,
}

impl TunnelOptions {
    pub fn new(host_id: Uuid, key_path: PathBuf, local_http_port: u16, local_ssh_port: u16) -> Self {
        Self {
            host_id,
            key_path,
            local_http_port,
            local_ssh_port,
            rest_local_port: 5000,
            ssh_program: "ssh".to_string(),
            keygen_program: "ssh-keygen".to_string(),
            restart_delay: Duration::from_secs(5),
            forward_failure_debounce: Duration::from_secs(15),
        }
    }
}

pub struct TunnelSupervisor {
    opts: TunnelOptions,
    registrar: std::sync::Arc<dyn TunnelRegistrar>,
    shutdown: CancellationToken,
    config_tx: tokio::sync::watch::Sender<Option<ReverseTunnelConfig>>,
}

impl TunnelSupervisor {
    pub fn new(
        opts: TunnelOptions,
        registrar: std::sync::Arc<dyn TunnelRegistrar>,
        shutdown: CancellationToken,
    ) -> (Self, tokio::sync::watch::Receiver<Option<ReverseTunnelConfig>>) {
        let (config_tx, config_rx) = tokio::sync::watch::channel(None);
        (Self { opts, registrar, shutdown, config_tx }, config_rx)
    }

    /// Supervision loop: register, spawn, watch, restart. Returns only on
    /// shutdown.
    pub async fn run(self) {
        let public_key =
            match ensure_keypair(&self.opts.key_path, &self.opts.keygen_program).await {
                Ok(key) => key,
                Err(e) => {
                    warn!(%e, "tunnel key generation failed, supervisor stopped");
                    return;
                }
            };

        let mut previous: Option<ReverseTunnelConfig> = None;
        let mut last_forward_failure: Option<Instant> = None;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let Some(config) = self.register_with_backoff(&public_key).await else { return };
            log_config_changes(previous.as_ref(), &config);
            previous = Some(config.clone());
            let _ = self.config_tx.send(Some(config.clone()));

            match self.run_child(&config, &mut last_forward_failure).await {
                ChildOutcome::Shutdown => return,
                ChildOutcome::Restart => {
                    debug!("tunnel restarting in {:?}", self.opts.restart_delay);
                    tokio::select! {
                        _ = tokio::time::sleep(self.opts.restart_delay) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                }
            }
        }
    }

    async fn register_with_backoff(&self, public_key: &str) -> Option<ReverseTunnelConfig> {
        let mut attempt = 0u32;
        loop {
            match self.registrar.register_tunnel(self.opts.host_id, public_key).await {
                Ok(config) => return Some(config),
                Err(e) => {
                    let delay = Duration::from_millis(backoff_ms(attempt));
                    warn!(%e, attempt, ?delay, "tunnel registration failed");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return None,
                    }
                }
            }
        }
    }

    async fn run_child(
        &self,
        config: &ReverseTunnelConfig,
        last_forward_failure: &mut Option<Instant>,
    ) -> ChildOutcome {
        let args = ssh_args(
            config,
            &self.opts.key_path,
            self.opts.local_http_port,
            self.opts.local_ssh_port,
            self.opts.rest_local_port,
        );
        let mut child = match Command::new(&self.opts.ssh_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(%e, program = %self.opts.ssh_program, "failed to spawn tunnel child");
                return ChildOutcome::Restart;
            }
        };
        info!(
            sshd = %config.sshd_host,
            sshd_port = config.sshd_port,
            http_port = config.http_tunnel_port,
            ssh_port = config.ssh_tunnel_port,
            "tunnel child started"
        );

        let stderr = child.stderr.take();
        let mut lines = stderr.map(|s| BufReader::new(s).lines());

        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(%status, "tunnel child exited"),
                        Err(e) => warn!(%e, "tunnel child wait failed"),
                    }
                    return ChildOutcome::Restart;
                }
                line = read_line(&mut lines) => {
                    debug!(line = %line, "tunnel stderr");
                    if is_forward_failure(&line) {
                        // Debounce: one detection per window.
                        let now = Instant::now();
                        let debounced = last_forward_failure
                            .map(|t| now.duration_since(t) < self.opts.forward_failure_debounce)
                            .unwrap_or(false);
                        if !debounced {
                            *last_forward_failure = Some(now);
                            warn!(line = %line, "forward failure, restarting tunnel");
                            terminate(&mut child).await;
                            return ChildOutcome::Restart;
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    terminate(&mut child).await;
                    return ChildOutcome::Shutdown;
                }
            }
        }
    }
}

enum ChildOutcome {
    Restart,
    Shutdown,
}

/// Next stderr line; parks forever once stderr is closed so `child.wait()`
/// wins the select.
async fn read_line(
    lines: &mut Option<tokio::io::Lines<BufReader<tokio::process::ChildStderr>>>,
) -> String {
    loop {
        if let Some(lines) = lines.as_mut() {
            if let Ok(Some(line)) = lines.next_line().await {
                return line;
            }
        }
        std::future::pending::<()>().await;
    }
}

/// SIGTERM, then reap.
async fn terminate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
    let _ = child.start_kill();
}

/// Log adopted parameter changes at INFO.
fn log_config_changes(previous: Option<&ReverseTunnelConfig>, current: &ReverseTunnelConfig) {
    let Some(previous) = previous else { return };
    if previous.sshd_host != current.sshd_host {
        info!(old = %previous.sshd_host, new = %current.sshd_host, "tunnel sshd_host changed");
    }
    if previous.sshd_port != current.sshd_port {
        info!(old = previous.sshd_port, new = current.sshd_port, "tunnel sshd_port changed");
    }
    if previous.rest_port != current.rest_port {
        info!(old = previous.rest_port, new = current.rest_port, "tunnel rest_port changed");
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
