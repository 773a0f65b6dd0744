// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed payloads of the `workspace.file.*` actions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// One directory entry from `workspace.file.list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub mtime_ms: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileListing {
    pub entries: Vec<FileEntry>,
}

/// File content for `put`/`get`, base64-encoded exactly once so bytes
/// survive the JSON transport unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileBytes {
    pub path: String,
    pub content_b64: String,
}

impl FileBytes {
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self { path: path.into(), content_b64: STANDARD.encode(bytes) }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.content_b64)
    }
}

/// Matches from `workspace.file.rg` (`path:line:text` lines, truncated to
/// the caller's cap).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchMatches {
    pub matches: Vec<String>,
    #[serde(default)]
    pub truncated: bool,
}

/// Paths from `workspace.file.fd`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FoundPaths {
    pub paths: Vec<String>,
    #[serde(default)]
    pub truncated: bool,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
