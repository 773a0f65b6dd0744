// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::types::ProjectUser;

#[test]
fn host_identity_is_stable() {
    let db = Db::open_in_memory().unwrap();
    let first = db.host_identity().unwrap();
    let second = db.host_identity().unwrap();
    assert_eq!(first, second);
}

#[test]
fn host_identity_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.db");
    let first = Db::open(&path).unwrap().host_identity().unwrap();
    let second = Db::open(&path).unwrap().host_identity().unwrap();
    assert_eq!(first, second);
}

#[test]
fn project_rows_round_trip() {
    let db = Db::open_in_memory().unwrap();
    let mut row = ProjectRow::new(Uuid::new_v4(), "demo");
    row.users.insert(Uuid::new_v4(), ProjectUser { group: "owner".into() });
    db.upsert_project(&row).unwrap();

    let loaded = db.project(row.project_id).unwrap().unwrap();
    assert_eq!(loaded.title, "demo");
    assert_eq!(loaded.users.len(), 1);

    assert_eq!(db.projects().unwrap().len(), 1);
    db.delete_project(row.project_id).unwrap();
    assert!(db.project(row.project_id).unwrap().is_none());
}

#[test]
fn project_secret_is_generated_once() {
    let db = Db::open_in_memory().unwrap();
    let row = ProjectRow::new(Uuid::new_v4(), "demo");
    db.upsert_project(&row).unwrap();

    let first = db.project_secret(row.project_id).unwrap();
    let second = db.project_secret(row.project_id).unwrap();
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn project_secret_requires_a_row() {
    let db = Db::open_in_memory().unwrap();
    assert!(matches!(
        db.project_secret(Uuid::new_v4()),
        Err(StoreError::UnknownProject(_))
    ));
}

#[test]
fn revocations_keep_highest_watermark() {
    let db = Db::open_in_memory().unwrap();
    let account_id = Uuid::new_v4();
    db.apply_revocation(AccountRevocation { account_id, revoked_before_ms: 500, updated_ms: 1 })
        .unwrap();
    db.apply_revocation(AccountRevocation { account_id, revoked_before_ms: 100, updated_ms: 2 })
        .unwrap();

    let rev = db.revocation(account_id).unwrap().unwrap();
    assert_eq!(rev.revoked_before_ms, 500);
}

#[test]
fn revocation_cursor_is_max_updated() {
    let db = Db::open_in_memory().unwrap();
    assert_eq!(db.revocation_cursor().unwrap(), 0);
    for (ms, updated) in [(1, 10), (2, 30), (3, 20)] {
        db.apply_revocation(AccountRevocation {
            account_id: Uuid::new_v4(),
            revoked_before_ms: ms,
            updated_ms: updated,
        })
        .unwrap();
    }
    assert_eq!(db.revocation_cursor().unwrap(), 30);
}

#[test]
fn generated_secrets_are_256_bit_base64url() {
    let secret = generate_secret();
    // 32 bytes → 43 unpadded base64url chars
    assert_eq!(secret.len(), 43);
    assert!(secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    assert_ne!(secret, generate_secret());
}
