// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated identities on the bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity a bus connection authenticated as.
///
/// `Hub` is the host's own trusted services (signed in with the local conat
/// password). `Account` is a browser or CLI user. `Project` is a workspace
/// process signing in with its per-project secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuthId {
    Hub,
    Account(Uuid),
    Project(Uuid),
}

impl AuthId {
    /// The inbox prefix reply subjects must carry for this identity.
    ///
    /// Binding replies to the authenticated identity is what prevents one
    /// account from receiving another's responses.
    pub fn inbox_prefix(&self) -> String {
        match self {
            AuthId::Hub => "_INBOX.hub".to_string(),
            AuthId::Account(id) => format!("_INBOX.account-{id}"),
            AuthId::Project(id) => format!("_INBOX.project-{id}"),
        }
    }

    pub fn is_hub(&self) -> bool {
        matches!(self, AuthId::Hub)
    }

    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            AuthId::Account(id) => Some(*id),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            AuthId::Project(id) => Some(*id),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthId::Hub => write!(f, "hub"),
            AuthId::Account(id) => write!(f, "account-{id}"),
            AuthId::Project(id) => write!(f, "project-{id}"),
        }
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
