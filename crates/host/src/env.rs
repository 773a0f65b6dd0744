// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the host daemon.

use std::path::PathBuf;
use std::time::Duration;

use ph_store::SecretOverrides;

use crate::creds::SharedHomeMode;

/// Daemon version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// URL of the master's bus, e.g. `https://master.example`.
pub fn master_conat_server() -> Option<String> {
    std::env::var("COCALC_MASTER_CONAT_SERVER")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| ph_core::normalize_url(&s))
}

/// Override the host identity instead of using the persisted one.
pub fn host_id_override() -> Option<uuid::Uuid> {
    std::env::var("PROJECT_HOST_ID").ok().and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
}

/// Serve TLS (controls the `Secure` cookie attribute).
pub fn https_enabled() -> bool {
    std::env::var("COCALC_PROJECT_HOST_HTTPS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

/// Data directory: `COCALC_PROJECT_HOST_DATA` > `/var/lib/cocalc-host`.
pub fn data_dir() -> PathBuf {
    std::env::var("COCALC_PROJECT_HOST_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/cocalc-host"))
}

/// Secrets directory: `COCALC_PROJECT_HOST_SECRETS` > `<data>/secrets`.
pub fn secrets_dir() -> PathBuf {
    std::env::var("COCALC_PROJECT_HOST_SECRETS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("secrets"))
}

/// Root of the per-account codex credential cache.
pub fn subscriptions_root() -> PathBuf {
    std::env::var("COCALC_CODEX_SUBSCRIPTIONS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("subscriptions"))
}

/// Listen address for the HTTP(S)/bus listener.
pub fn listen_addr() -> String {
    std::env::var("COCALC_PROJECT_HOST_LISTEN").unwrap_or_else(|_| "0.0.0.0:9100".to_string())
}

/// Base path this host is mounted under (empty for the root). Determines
/// the per-base-path session cookie name.
pub fn base_path() -> String {
    std::env::var("COCALC_PROJECT_HOST_BASE_PATH").unwrap_or_default()
}

/// Secret file/env overrides (see `ph_store::Secrets`).
pub fn secret_overrides() -> SecretOverrides {
    let var = |name: &str| std::env::var(name).ok().filter(|s| !s.is_empty());
    SecretOverrides {
        conat_password: var("COCALC_PROJECT_HOST_CONAT_PASSWORD"),
        conat_password_path: var("COCALC_PROJECT_HOST_CONAT_PASSWORD_PATH").map(PathBuf::from),
        master_token: var("COCALC_PROJECT_HOST_MASTER_CONAT_TOKEN"),
        master_token_path: var("COCALC_PROJECT_HOST_MASTER_CONAT_TOKEN_PATH")
            .map(PathBuf::from),
        bootstrap_token: var("COCALC_PROJECT_HOST_BOOTSTRAP_TOKEN"),
    }
}

/// Shared-home credential mode for codex containers (see
/// `creds::SharedHomeMode` for what each variant changes).
pub fn codex_shared_home_mode() -> SharedHomeMode {
    match std::env::var("COCALC_CODEX_AUTH_SHARED_HOME_MODE").as_deref() {
        Ok("prefer") => SharedHomeMode::Prefer,
        Ok("always") => SharedHomeMode::Always,
        _ => SharedHomeMode::Fallback,
    }
}

fn duration_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Credential cache entry TTL (default 72 h).
pub fn codex_cache_ttl() -> Duration {
    duration_var("COCALC_CODEX_SUBSCRIPTION_CACHE_TTL_MS", Duration::from_secs(72 * 3600))
}

/// Command performing a codex device login; runs with `CODEX_HOME` set to
/// the account's shared credential home. Whitespace-split.
pub fn codex_login_command() -> Vec<String> {
    std::env::var("COCALC_CODEX_LOGIN_COMMAND")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "codex login".to_string())
        .split_whitespace()
        .map(String::from)
        .collect()
}

/// Credential cache sweep interval (default 1 h, clamped to ≥ 1 min).
pub fn codex_cache_sweep() -> Duration {
    duration_var("COCALC_CODEX_SUBSCRIPTION_CACHE_SWEEP_MS", Duration::from_secs(3600))
        .max(Duration::from_secs(60))
}

/// Revocation sweep cadence for upgraded websockets.
pub fn revocation_sweep_interval() -> Duration {
    duration_var("COCALC_PROJECT_HOST_REVOCATION_SWEEP_MS", Duration::from_secs(30))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
