// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ph_core::OpId;

/// Operation status. Terminal: succeeded, failed, canceled, expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Expired,
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpStatus::Succeeded | OpStatus::Failed | OpStatus::Canceled | OpStatus::Expired
        )
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpStatus::Queued => "queued",
            OpStatus::Running => "running",
            OpStatus::Succeeded => "succeeded",
            OpStatus::Failed => "failed",
            OpStatus::Canceled => "canceled",
            OpStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Project,
    Account,
    Host,
    Hub,
}

/// What the operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpScope {
    pub scope_type: ScopeType,
    pub scope_id: Uuid,
}

impl OpScope {
    pub fn project(id: Uuid) -> Self {
        Self { scope_type: ScopeType::Project, scope_id: id }
    }

    pub fn account(id: Uuid) -> Self {
        Self { scope_type: ScopeType::Account, scope_id: id }
    }

    pub fn host(id: Uuid) -> Self {
        Self { scope_type: ScopeType::Host, scope_id: id }
    }
}

/// The pollable view of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpSummary {
    pub op_id: OpId,
    pub kind: String,
    #[serde(flatten)]
    pub scope: OpScope,
    pub status: OpStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt: u32,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<u64>,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
