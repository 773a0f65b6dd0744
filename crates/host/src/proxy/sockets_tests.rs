// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ph_auth::{KeyStore, SessionKey};
use ph_core::FakeClock;
use ph_store::{AccountRevocation, Db};

fn gates(clock: FakeClock) -> AuthGates<FakeClock> {
    AuthGates {
        host_id: Uuid::new_v4(),
        session_key: SessionKey::new(*b"kkkkkkkkkkkkkkkkkkkkkkkkkkkkkkkk"),
        session_cookie: ph_auth::session_cookie_name(""),
        keys: Arc::new(KeyStore::new()),
        db: Arc::new(Db::open_in_memory().unwrap()),
        clock,
    }
}

#[test]
fn register_and_remove_track_the_set() {
    let tracker = WsTracker::new();
    let (id_a, _cancel_a) = tracker.register(Uuid::new_v4(), 1);
    let (id_b, _cancel_b) = tracker.register(Uuid::new_v4(), 2);
    assert_eq!(tracker.len(), 2);
    tracker.remove(id_a);
    assert_eq!(tracker.len(), 1);
    tracker.remove(id_b);
    assert!(tracker.is_empty());
}

#[test]
fn sweep_cancels_only_revoked_sockets() {
    let clock = FakeClock::new();
    let gates = gates(clock.clone());
    let tracker = WsTracker::new();

    let revoked_account = Uuid::new_v4();
    let healthy_account = Uuid::new_v4();
    let iat = clock.epoch_secs();
    let (_id_r, cancel_r) = tracker.register(revoked_account, iat);
    let (_id_h, cancel_h) = tracker.register(healthy_account, iat);

    // Nothing revoked yet: sweep is a no-op.
    assert_eq!(tracker.sweep(&gates), 0);
    assert!(!cancel_r.is_cancelled());

    gates
        .db
        .apply_revocation(AccountRevocation {
            account_id: revoked_account,
            revoked_before_ms: iat * 1000 + 1,
            updated_ms: clock.epoch_ms(),
        })
        .unwrap();

    assert_eq!(tracker.sweep(&gates), 1);
    assert!(cancel_r.is_cancelled());
    assert!(!cancel_h.is_cancelled());
}

#[test]
fn sockets_issued_after_the_watermark_survive_sweeps() {
    let clock = FakeClock::new();
    let gates = gates(clock.clone());
    let tracker = WsTracker::new();
    let account = Uuid::new_v4();

    gates
        .db
        .apply_revocation(AccountRevocation {
            account_id: account,
            revoked_before_ms: clock.epoch_ms(),
            updated_ms: clock.epoch_ms(),
        })
        .unwrap();

    // Upgraded two seconds after the watermark.
    clock.advance_secs(2);
    let (_id, cancel) = tracker.register(account, clock.epoch_secs());
    assert_eq!(tracker.sweep(&gates), 0);
    assert!(!cancel.is_cancelled());
}
