// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Request from CLI to daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Caller-chosen correlation id, echoed in the response.
    pub id: u64,
    pub action: Action,
    /// Working directory of the invoking CLI (workspace resolution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Auth-affecting global flags of the invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globals: Option<AuthGlobals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, action: Action) -> Self {
        Self { id, action, cwd: None, globals: None, payload: None }
    }
}

/// The daemon's action set. Exact and closed: unknown actions fail to parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "shutdown")]
    Shutdown,
    #[serde(rename = "workspace.file.list")]
    FileList,
    #[serde(rename = "workspace.file.cat")]
    FileCat,
    #[serde(rename = "workspace.file.put")]
    FilePut,
    #[serde(rename = "workspace.file.get")]
    FileGet,
    #[serde(rename = "workspace.file.rm")]
    FileRm,
    #[serde(rename = "workspace.file.mkdir")]
    FileMkdir,
    #[serde(rename = "workspace.file.rg")]
    FileRg,
    #[serde(rename = "workspace.file.fd")]
    FileFd,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::Shutdown => "shutdown",
            Action::FileList => "workspace.file.list",
            Action::FileCat => "workspace.file.cat",
            Action::FilePut => "workspace.file.put",
            Action::FileGet => "workspace.file.get",
            Action::FileRm => "workspace.file.rm",
            Action::FileMkdir => "workspace.file.mkdir",
            Action::FileRg => "workspace.file.rg",
            Action::FileFd => "workspace.file.fd",
        }
    }
}

/// Auth-affecting globals. Concurrent callers with identical globals share
/// one bus context inside the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthGlobals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_password: Option<String>,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
