// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn terminal_statuses() {
    assert!(!OpStatus::Queued.is_terminal());
    assert!(!OpStatus::Running.is_terminal());
    for status in [OpStatus::Succeeded, OpStatus::Failed, OpStatus::Canceled, OpStatus::Expired] {
        assert!(status.is_terminal(), "{status}");
    }
}

#[test]
fn status_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&OpStatus::Succeeded).unwrap(), "\"succeeded\"");
    let back: OpStatus = serde_json::from_str("\"canceled\"").unwrap();
    assert_eq!(back, OpStatus::Canceled);
}

#[test]
fn summary_flattens_scope() {
    let summary = OpSummary {
        op_id: OpId::from_string("lro-x"),
        kind: "project.start".into(),
        scope: OpScope::project(Uuid::new_v4()),
        status: OpStatus::Queued,
        error: None,
        attempt: 1,
        created_at: 1,
        started_at: None,
        finished_at: None,
        updated_at: 1,
        expires_at: None,
        dismissed_at: None,
        input: serde_json::Value::Null,
        result: None,
        progress_summary: None,
        created_by: None,
        owner_type: None,
        owner_id: None,
    };
    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["scope_type"], "project");
    assert!(value.get("scope").is_none());
    let back: OpSummary = serde_json::from_value(value).unwrap();
    assert_eq!(back.scope, summary.scope);
}
