// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed rows stored in the key/value table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of an account on a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUser {
    pub group: String,
}

/// Deletion marker: legacy rows carry a bool, newer rows a timestamp (ms).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Deleted {
    Flag(bool),
    At(u64),
}

impl Deleted {
    pub fn is_deleted(&self) -> bool {
        match self {
            Deleted::Flag(deleted) => *deleted,
            Deleted::At(_) => true,
        }
    }
}

impl Default for Deleted {
    fn default() -> Self {
        Deleted::Flag(false)
    }
}

/// A project as the host knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub project_id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub host_id: Option<Uuid>,
    #[serde(default)]
    pub state: Option<ProjectState>,
    #[serde(default)]
    pub last_edited: Option<u64>,
    #[serde(default)]
    pub deleted: Deleted,
    #[serde(default)]
    pub users: HashMap<Uuid, ProjectUser>,
    /// Generated on first read; never leaves the host.
    #[serde(default)]
    pub secret_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub state: String,
}

impl ProjectRow {
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            project_id,
            title: title.into(),
            host_id: None,
            state: None,
            last_edited: None,
            deleted: Deleted::default(),
            users: HashMap::new(),
            secret_token: String::new(),
        }
    }

    /// Visibility rule: collaborators, owners, and the project identity
    /// itself.
    pub fn visible_to(&self, account_id: Uuid) -> bool {
        if account_id == self.project_id {
            return true;
        }
        self.users
            .get(&account_id)
            .map(|u| u.group == "owner" || u.group == "collaborator")
            .unwrap_or(false)
    }
}

/// How clients reach this host. The two shapes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostConnection {
    /// Direct URL to the host's listener.
    Remote { connect_url: String, ssh_server: Option<String> },
    /// Reached through the master's local proxy (reverse tunnel).
    LocalProxy { ssh_server: Option<String> },
}

/// Account-level session revocation watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRevocation {
    pub account_id: Uuid,
    pub revoked_before_ms: u64,
    pub updated_ms: u64,
}

impl AccountRevocation {
    /// A session issued at `iat` seconds is revoked iff
    /// `iat * 1000 <= revoked_before_ms`.
    pub fn revokes(&self, iat_secs: u64) -> bool {
        iat_secs * 1000 <= self.revoked_before_ms
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
