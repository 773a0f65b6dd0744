// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user daemon paths under `XDG_RUNTIME_DIR/cocalc/`.

use std::path::PathBuf;

/// Socket, pid file, and stderr log for one user's daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub dir: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonPaths {
    pub fn for_uid(runtime_dir: &std::path::Path, uid: u32) -> Self {
        let dir = runtime_dir.join("cocalc");
        Self {
            socket: dir.join(format!("cli-daemon-{uid}.sock")),
            pid_file: dir.join(format!("cli-daemon-{uid}.pid")),
            log_file: dir.join(format!("cli-daemon-{uid}.log")),
            dir,
        }
    }

    /// Resolve for the current user: `XDG_RUNTIME_DIR`, falling back to
    /// `/tmp` when unset.
    pub fn resolve() -> Self {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        let uid = nix::unistd::Uid::current().as_raw();
        Self::for_uid(&runtime_dir, uid)
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
