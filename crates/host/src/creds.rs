// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-account codex credential cache.
//!
//! Layout: `SUBSCRIPTIONS_ROOT/<account_id>/` holding `auth.json`, a config
//! file forcing file-based credential storage, and a `.last_used` marker
//! touched on every successful use. The cache syncs with the master's
//! credential registry and is garbage-collected by age, skipping
//! directories a live container still mounts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ph_core::{Clock, TtlCache};

use crate::adapters::ContainerRuntime;
use crate::device_auth::{DeviceAuthParser, DeviceAuthPrompt};

/// Mount destination codex containers use for the credential directory.
pub const CODEX_MOUNT_DESTINATION: &str = "/root/.codex";

const AUTH_FILE: &str = "auth.json";
const CONFIG_FILE: &str = "config.toml";
const LAST_USED_FILE: &str = ".last_used";

/// Forces codex to keep credentials in `auth.json` rather than a keyring.
const CONFIG_CONTENTS: &str = "cli_auth_credentials_store = \"file\"\n";

const EXISTENCE_TTL: Duration = Duration::from_secs(30);
const EXISTENCE_CAPACITY: usize = 10_000;

/// How containers source their codex credential relative to the shared
/// per-account home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharedHomeMode {
    /// Use the shared home only when a credential is already there; never
    /// consult the central registry on the use path.
    #[default]
    Fallback,
    /// Prefer the local copy, syncing with the central registry
    /// (existence check, pull when missing).
    Prefer,
    /// The central registry is authoritative: refresh the local copy from
    /// it on every resolve; an absent central entry removes the local one.
    Always,
}

#[derive(Debug, Error)]
pub enum CredsError {
    #[error("credential io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("login failed: {0}")]
    Login(String),
}

/// The master's central credential registry, keyed by
/// `(provider=openai, kind=codex-subscription-auth-json, scope=account,
/// owner_account_id)`.
#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    async fn exists(&self, account_id: Uuid) -> Result<bool, CredsError>;
    async fn pull(&self, account_id: Uuid) -> Result<Option<String>, CredsError>;
    async fn push(&self, account_id: Uuid, auth_json: &str) -> Result<(), CredsError>;
    /// Opportunistic last-used notification; failures are ignored.
    async fn notify_used(&self, account_id: Uuid);
}

/// Registry that never syncs: the unsynchronized cache variant. Local
/// entries are treated as authoritative.
pub struct NoopRegistry;

#[async_trait]
impl CredentialRegistry for NoopRegistry {
    async fn exists(&self, _account_id: Uuid) -> Result<bool, CredsError> {
        Ok(true)
    }

    async fn pull(&self, _account_id: Uuid) -> Result<Option<String>, CredsError> {
        Ok(None)
    }

    async fn push(&self, _account_id: Uuid, _auth_json: &str) -> Result<(), CredsError> {
        Ok(())
    }

    async fn notify_used(&self, _account_id: Uuid) {}
}

/// In-memory registry for tests.
#[derive(Default)]
pub struct FakeRegistry {
    pub entries: Mutex<std::collections::HashMap<Uuid, String>>,
    pub exists_calls: std::sync::atomic::AtomicU64,
    pub used: Mutex<Vec<Uuid>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, account_id: Uuid, auth_json: impl Into<String>) {
        self.entries.lock().insert(account_id, auth_json.into());
    }

    pub fn revoke(&self, account_id: Uuid) {
        self.entries.lock().remove(&account_id);
    }
}

#[async_trait]
impl CredentialRegistry for FakeRegistry {
    async fn exists(&self, account_id: Uuid) -> Result<bool, CredsError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().contains_key(&account_id))
    }

    async fn pull(&self, account_id: Uuid) -> Result<Option<String>, CredsError> {
        Ok(self.entries.lock().get(&account_id).cloned())
    }

    async fn push(&self, account_id: Uuid, auth_json: &str) -> Result<(), CredsError> {
        self.entries.lock().insert(account_id, auth_json.to_string());
        Ok(())
    }

    async fn notify_used(&self, account_id: Uuid) {
        self.used.lock().push(account_id);
    }
}

/// Outcome of one GC sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub skipped_live: usize,
    pub kept_fresh: usize,
    /// A sweep was already running; this one was dropped.
    pub dropped: bool,
}

pub struct CodexCache<C: Clock> {
    root: PathBuf,
    registry: Arc<dyn CredentialRegistry>,
    containers: Arc<dyn ContainerRuntime>,
    existence: TtlCache<Uuid, bool, C>,
    mode: SharedHomeMode,
    ttl: Duration,
    sweep_interval: Duration,
    sweeping: AtomicBool,
    clock: C,
}

impl<C: Clock> CodexCache<C> {
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<dyn CredentialRegistry>,
        containers: Arc<dyn ContainerRuntime>,
        mode: SharedHomeMode,
        ttl: Duration,
        sweep_interval: Duration,
        clock: C,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            containers,
            existence: TtlCache::new(EXISTENCE_CAPACITY, EXISTENCE_TTL, clock.clone()),
            mode,
            ttl,
            sweep_interval: sweep_interval.max(Duration::from_secs(60)),
            sweeping: AtomicBool::new(false),
            clock,
        }
    }

    pub fn account_dir(&self, account_id: Uuid) -> PathBuf {
        self.root.join(account_id.to_string())
    }

    /// After a successful local login: store and upload the credential.
    pub async fn push_login(
        &self,
        account_id: Uuid,
        auth_json: &str,
    ) -> Result<PathBuf, CredsError> {
        let dir = self.account_dir(account_id);
        write_credential_files(&dir, auth_json)?;
        self.registry.push(account_id, auth_json).await?;
        self.existence.insert(account_id, true);
        info!(%account_id, "uploaded codex credential");
        Ok(dir)
    }

    /// Run the device-login command with `CODEX_HOME` pointed at the
    /// account's shared home, surfacing the verification prompt scraped
    /// from its output. On success the credential the command wrote is
    /// uploaded via [`Self::push_login`].
    pub async fn run_device_login(
        &self,
        account_id: Uuid,
        command: &[String],
        mut on_prompt: impl FnMut(DeviceAuthPrompt) + Send,
    ) -> Result<PathBuf, CredsError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CredsError::Login("empty login command".to_string()))?;
        let dir = self.account_dir(account_id);
        ensure_private_dir(&dir)?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .env("CODEX_HOME", &dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CredsError::Login(format!("spawn {program}: {e}")))?;

        let mut parser = DeviceAuthParser::new();
        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                line = next_login_line(&mut stdout) => {
                    if let Some(prompt) = parser.feed(&line) {
                        info!(%account_id, url = %prompt.url, "device login prompt");
                        on_prompt(prompt);
                    }
                }
                line = next_login_line(&mut stderr) => {
                    if let Some(prompt) = parser.feed(&line) {
                        info!(%account_id, url = %prompt.url, "device login prompt");
                        on_prompt(prompt);
                    }
                }
            }
        }
        .map_err(|e| CredsError::Login(e.to_string()))?;
        if !status.success() {
            return Err(CredsError::Login(format!("login command exited with {status}")));
        }

        let auth_path = dir.join(AUTH_FILE);
        let auth_json = std::fs::read_to_string(&auth_path).map_err(|_| {
            CredsError::Login("login command wrote no credential".to_string())
        })?;
        self.push_login(account_id, &auth_json).await
    }

    /// Resolve credentials for use by a container. Returns the directory to
    /// mount at [`CODEX_MOUNT_DESTINATION`], or `None` when the account has
    /// no credential anywhere. The shared-home mode decides how much the
    /// central registry is consulted.
    pub async fn resolve(&self, account_id: Uuid) -> Result<Option<PathBuf>, CredsError> {
        let dir = self.account_dir(account_id);
        let auth_path = dir.join(AUTH_FILE);

        match self.mode {
            // Local-only: the shared home is just a fallback for
            // containers that log in themselves.
            SharedHomeMode::Fallback => {
                if !auth_path.exists() {
                    return Ok(None);
                }
                ensure_config_file(&dir)?;
                touch(&dir.join(LAST_USED_FILE))?;
                return Ok(Some(dir));
            }

            SharedHomeMode::Prefer => {
                if auth_path.exists() && !self.exists_centrally(account_id).await? {
                    // Revoked elsewhere: drop the local copy and fall
                    // through to a fresh pull (which will also miss).
                    debug!(
                        %account_id,
                        "central registry dropped credential, deleting local copy"
                    );
                    std::fs::remove_file(&auth_path).map_err(|source| CredsError::Io {
                        path: auth_path.clone(),
                        source,
                    })?;
                }
                if !auth_path.exists() {
                    let Some(auth_json) = self.registry.pull(account_id).await? else {
                        return Ok(None);
                    };
                    write_credential_files(&dir, &auth_json)?;
                } else {
                    ensure_config_file(&dir)?;
                }
            }

            // Central is authoritative: refresh on every use.
            SharedHomeMode::Always => match self.registry.pull(account_id).await? {
                Some(auth_json) => write_credential_files(&dir, &auth_json)?,
                None => {
                    if auth_path.exists() {
                        std::fs::remove_file(&auth_path).map_err(|source| {
                            CredsError::Io { path: auth_path.clone(), source }
                        })?;
                    }
                    return Ok(None);
                }
            },
        }

        touch(&dir.join(LAST_USED_FILE))?;
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move { registry.notify_used(account_id).await });
        Ok(Some(dir))
    }

    async fn exists_centrally(&self, account_id: Uuid) -> Result<bool, CredsError> {
        if let Some(cached) = self.existence.get(&account_id) {
            return Ok(cached);
        }
        let exists = self.registry.exists(account_id).await?;
        self.existence.insert(account_id, exists);
        Ok(exists)
    }

    /// One GC pass. Re-entrant calls are dropped; a directory is removed
    /// iff no live container mounts it AND its age exceeds the TTL.
    pub async fn gc_sweep(&self) -> Result<SweepReport, CredsError> {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            return Ok(SweepReport { dropped: true, ..Default::default() });
        }
        let report = self.sweep_inner().await;
        self.sweeping.store(false, Ordering::SeqCst);
        report
    }

    async fn sweep_inner(&self) -> Result<SweepReport, CredsError> {
        let mut report = SweepReport::default();
        let live = match self.containers.mounts_with_destination(CODEX_MOUNT_DESTINATION).await {
            Ok(live) => live,
            Err(e) => {
                // Runtime unreachable: treat everything as live rather than
                // deleting credentials out from under running containers.
                warn!(%e, "container runtime unavailable, skipping sweep");
                return Ok(report);
            }
        };

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(CredsError::Io { path: self.root.clone(), source })
            }
        };
        let now_ms = self.clock.epoch_ms();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            if live.iter().any(|mount| mount == &dir) {
                report.skipped_live += 1;
                continue;
            }
            let age_ms = now_ms.saturating_sub(newest_mtime_ms(&dir));
            if age_ms > self.ttl.as_millis() as u64 {
                info!(dir = %dir.display(), age_ms, "removing expired codex credential");
                std::fs::remove_dir_all(&dir)
                    .map_err(|source| CredsError::Io { path: dir.clone(), source })?;
                report.removed.push(dir);
            } else {
                report.kept_fresh += 1;
            }
        }
        Ok(report)
    }

    /// Periodic sweep with an initial random jitter of up to half the
    /// interval.
    pub async fn run_gc_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.sweep_interval.as_millis() as u64 / 2);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
            _ = shutdown.cancelled() => return,
        }
        loop {
            if let Err(e) = self.gc_sweep().await {
                warn!(%e, "codex credential sweep failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

fn ensure_private_dir(dir: &Path) -> Result<(), CredsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir)
        .map_err(|source| CredsError::Io { path: dir.to_path_buf(), source })?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|source| CredsError::Io { path: dir.to_path_buf(), source })
}

/// Next line from a login stream; parks forever once the stream is closed
/// so `child.wait()` wins the select.
async fn next_login_line<R>(
    lines: &mut Option<tokio::io::Lines<BufReader<R>>>,
) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        if let Some(lines) = lines.as_mut() {
            if let Ok(Some(line)) = lines.next_line().await {
                return line;
            }
        }
        std::future::pending::<()>().await;
    }
}

fn write_credential_files(dir: &Path, auth_json: &str) -> Result<(), CredsError> {
    use std::os::unix::fs::PermissionsExt;
    ensure_private_dir(dir)?;

    let auth_path = dir.join(AUTH_FILE);
    std::fs::write(&auth_path, auth_json)
        .map_err(|source| CredsError::Io { path: auth_path.clone(), source })?;
    std::fs::set_permissions(&auth_path, std::fs::Permissions::from_mode(0o600))
        .map_err(|source| CredsError::Io { path: auth_path, source })?;

    ensure_config_file(dir)
}

fn ensure_config_file(dir: &Path) -> Result<(), CredsError> {
    let config_path = dir.join(CONFIG_FILE);
    let current = std::fs::read_to_string(&config_path).unwrap_or_default();
    if !current.contains("cli_auth_credentials_store") {
        let mut merged = current;
        merged.push_str(CONFIG_CONTENTS);
        std::fs::write(&config_path, merged)
            .map_err(|source| CredsError::Io { path: config_path, source })?;
    }
    Ok(())
}

/// Update a marker file's mtime by rewriting it.
fn touch(path: &Path) -> Result<(), CredsError> {
    std::fs::write(path, b"")
        .map_err(|source| CredsError::Io { path: path.to_path_buf(), source })
}

/// Newest mtime (ms) among the directory itself and its marker files.
fn newest_mtime_ms(dir: &Path) -> u64 {
    let mtime = |p: &Path| -> u64 {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    };
    [
        mtime(dir),
        mtime(&dir.join(LAST_USED_FILE)),
        mtime(&dir.join(AUTH_FILE)),
        mtime(&dir.join(CONFIG_FILE)),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

#[cfg(test)]
#[path = "creds_tests.rs"]
mod tests;
