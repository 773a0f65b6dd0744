// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace context: `.cocalc-workspace` in the working directory or any
//! ancestor. A bare UUID in the file is accepted as shorthand.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const WORKSPACE_FILE: &str = ".cocalc-workspace";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace file io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable workspace file at {path}")]
    Unparseable { path: PathBuf },

    #[error("no workspace context found from {0}")]
    NotFound(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceContext {
    pub workspace_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_at: Option<String>,
}

impl WorkspaceContext {
    pub fn new(workspace_id: Uuid) -> Self {
        Self { workspace_id, title: None, set_at: None }
    }
}

/// Parse a workspace file: JSON object, or a raw UUID shorthand.
pub fn parse_workspace_file(path: &Path, raw: &str) -> Result<WorkspaceContext, WorkspaceError> {
    let trimmed = raw.trim();
    if let Ok(context) = serde_json::from_str::<WorkspaceContext>(trimmed) {
        return Ok(context);
    }
    if let Ok(id) = Uuid::parse_str(trimmed) {
        return Ok(WorkspaceContext::new(id));
    }
    Err(WorkspaceError::Unparseable { path: path.to_path_buf() })
}

/// Find the context for `dir` by walking toward the filesystem root.
pub fn find_workspace_context(dir: &Path) -> Result<WorkspaceContext, WorkspaceError> {
    let mut current = Some(dir);
    while let Some(candidate) = current {
        let path = candidate.join(WORKSPACE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => return parse_workspace_file(&path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(WorkspaceError::Io { path, source }),
        }
        current = candidate.parent();
    }
    Err(WorkspaceError::NotFound(dir.to_path_buf()))
}

/// Write the context into `dir` (always the JSON form).
pub fn save_workspace_context(
    dir: &Path,
    context: &WorkspaceContext,
) -> Result<(), WorkspaceError> {
    let path = dir.join(WORKSPACE_FILE);
    let raw = serde_json::to_string_pretty(context)
        .map_err(|_| WorkspaceError::Unparseable { path: path.clone() })?;
    std::fs::write(&path, raw).map_err(|source| WorkspaceError::Io { path, source })
}

pub fn clear_workspace_context(dir: &Path) -> Result<bool, WorkspaceError> {
    let path = dir.join(WORKSPACE_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(WorkspaceError::Io { path, source }),
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
