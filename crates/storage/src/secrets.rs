// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host's own credential files.
//!
//! Two secrets live under the secrets directory: the local conat password
//! (generated if missing) and the master bearer token (rotated by the
//! master, written only by the registration loop). Reads trim whitespace
//! and treat empty as absent; writes are temp-and-rename with mode 0600
//! under 0700 parents.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::db::generate_secret;

const CONAT_PASSWORD_FILE: &str = "project-host-conat-password";
const MASTER_TOKEN_FILE: &str = "master-conat-token";
const BOOTSTRAP_TOKEN_FILE: &str = "bootstrap-token";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("secrets io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SecretsError + '_ {
    move |source| SecretsError::Io { path: path.to_path_buf(), source }
}

/// Environment-provided overrides, resolved by the binary's `env` module.
#[derive(Debug, Default, Clone)]
pub struct SecretOverrides {
    pub conat_password: Option<String>,
    pub conat_password_path: Option<PathBuf>,
    pub master_token: Option<String>,
    pub master_token_path: Option<PathBuf>,
    pub bootstrap_token: Option<String>,
}

/// Accessor for the secrets directory.
pub struct Secrets {
    dir: PathBuf,
    overrides: SecretOverrides,
}

impl Secrets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), overrides: SecretOverrides::default() }
    }

    pub fn with_overrides(dir: impl Into<PathBuf>, overrides: SecretOverrides) -> Self {
        Self { dir: dir.into(), overrides }
    }

    /// The local conat password; generated (256-bit base64url) and persisted
    /// on first use.
    pub fn conat_password(&self) -> Result<String, SecretsError> {
        if let Some(value) = non_empty(self.overrides.conat_password.as_deref()) {
            return Ok(value);
        }
        let path = self
            .overrides
            .conat_password_path
            .clone()
            .unwrap_or_else(|| self.dir.join(CONAT_PASSWORD_FILE));
        if let Some(existing) = read_secret_file(&path)? {
            return Ok(existing);
        }
        let password = generate_secret();
        write_secret_file(&path, &password)?;
        tracing::info!(path = %path.display(), "generated conat password");
        Ok(password)
    }

    /// The current master bearer token, if any.
    pub fn master_token(&self) -> Result<Option<String>, SecretsError> {
        if let Some(value) = non_empty(self.overrides.master_token.as_deref()) {
            return Ok(Some(value));
        }
        read_secret_file(&self.master_token_path())
    }

    /// True when the token was injected via environment (the registration
    /// loop must not rotate it in that case).
    pub fn master_token_is_injected(&self) -> bool {
        non_empty(self.overrides.master_token.as_deref()).is_some()
    }

    /// Persist a rotated master token before it is used.
    pub fn write_master_token(&self, token: &str) -> Result<(), SecretsError> {
        write_secret_file(&self.master_token_path(), token)
    }

    /// One-time bootstrap token for a fresh host.
    pub fn bootstrap_token(&self) -> Result<Option<String>, SecretsError> {
        if let Some(value) = non_empty(self.overrides.bootstrap_token.as_deref()) {
            return Ok(Some(value));
        }
        read_secret_file(&self.dir.join(BOOTSTRAP_TOKEN_FILE))
    }

    /// Private half of the reverse-tunnel key pair (`.pub` beside it).
    pub fn tunnel_key_path(&self) -> PathBuf {
        self.dir.join("launchpad").join("tunnel-key")
    }

    /// Symmetric key signing HTTP session cookies. Generated once so
    /// sessions survive restarts.
    pub fn http_session_key(&self) -> Result<String, SecretsError> {
        let path = self.dir.join("http-session-key");
        if let Some(existing) = read_secret_file(&path)? {
            return Ok(existing);
        }
        let key = generate_secret();
        write_secret_file(&path, &key)?;
        Ok(key)
    }

    fn master_token_path(&self) -> PathBuf {
        self.overrides
            .master_token_path
            .clone()
            .unwrap_or_else(|| self.dir.join(MASTER_TOKEN_FILE))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Read a single-line secret. Missing or empty (after trim) is `None`.
pub fn read_secret_file(path: &Path) -> Result<Option<String>, SecretsError> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SecretsError::Io { path: path.to_path_buf(), source }),
    }
}

/// Write a secret atomically: 0700 parents, 0600 temp file, rename.
pub fn write_secret_file(path: &Path, value: &str) -> Result<(), SecretsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
            .map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .map_err(io_err(&tmp))?;
        file.write_all(value.as_bytes()).map_err(io_err(&tmp))?;
        file.write_all(b"\n").map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
