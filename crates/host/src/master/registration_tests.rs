// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use tokio::sync::mpsc;

use ph_bus::BusError;
use ph_store::SecretOverrides;

use crate::master::HostRegistration;

#[derive(Default)]
struct FakeMaster {
    rotations: AtomicU64,
    heartbeats: AtomicU64,
    registered: Mutex<Vec<HostRegistration>>,
    presented: Mutex<Vec<String>>,
    public_key: Mutex<Option<String>>,
    key_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    fail_rotation: Mutex<bool>,
}

#[async_trait]
impl MasterApi for FakeMaster {
    async fn rotate_master_token(
        &self,
        _host_id: Uuid,
        presented: &str,
    ) -> Result<String, BusError> {
        if *self.fail_rotation.lock() {
            return Err(BusError::Transport("master unreachable".into()));
        }
        self.presented.lock().push(presented.to_string());
        let n = self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(format!("master-token-{n}"))
    }

    async fn fetch_auth_public_key(&self) -> Result<String, BusError> {
        self.public_key
            .lock()
            .clone()
            .ok_or_else(|| BusError::Transport("no key configured".into()))
    }

    async fn register_host(&self, registration: &HostRegistration) -> Result<(), BusError> {
        self.registered.lock().push(registration.clone());
        Ok(())
    }

    async fn heartbeat(&self, _host_id: Uuid) -> Result<(), BusError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn key_updates(&self) -> Result<mpsc::UnboundedReceiver<String>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.key_tx.lock() = Some(tx);
        Ok(rx)
    }
}

fn encoded_key(signing: &SigningKey) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(signing.verifying_key().to_bytes())
}

#[tokio::test]
async fn existing_token_is_used_without_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Secrets::new(dir.path());
    secrets.write_master_token("existing").unwrap();
    let master = FakeMaster::default();

    let token = ensure_master_token(&secrets, &master, Uuid::new_v4()).await.unwrap();
    assert_eq!(token, "existing");
    assert_eq!(master.rotations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bootstrap_rotation_persists_before_use() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Secrets::with_overrides(
        dir.path(),
        SecretOverrides { bootstrap_token: Some("boot-1".into()), ..Default::default() },
    );
    let master = FakeMaster::default();

    let token = ensure_master_token(&secrets, &master, Uuid::new_v4()).await.unwrap();
    assert_eq!(token, "master-token-0");
    assert_eq!(master.presented.lock().as_slice(), ["boot-1"]);
    // Persisted before the function returned.
    assert_eq!(secrets.master_token().unwrap(), Some("master-token-0".into()));
}

#[tokio::test]
async fn no_credentials_at_all_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Secrets::new(dir.path());
    let master = FakeMaster::default();
    let result = ensure_master_token(&secrets, &master, Uuid::new_v4()).await;
    assert!(matches!(result, Err(RegistrationError::NoCredentials)), "{result:?}");
}

#[tokio::test]
async fn key_install_applies_broadcast_updates() {
    let master = Arc::new(FakeMaster::default());
    let first = SigningKey::generate(&mut OsRng);
    *master.public_key.lock() = Some(encoded_key(&first));

    let keys = Arc::new(KeyStore::new());
    let shutdown = CancellationToken::new();
    install_verification_key(master.as_ref(), &keys, &shutdown).await.unwrap();
    assert!(keys.has_key());

    // Broadcast a replacement key and observe it being applied: a token
    // signed by the new key verifies afterwards.
    let second = SigningKey::generate(&mut OsRng);
    let host_id = Uuid::new_v4();
    let clock = ph_core::FakeClock::new();
    let claims = ph_auth::token::RoutedClaims {
        sub: Uuid::new_v4().to_string(),
        aud: host_id,
        act: "account".into(),
        iat: clock.epoch_secs(),
        exp: clock.epoch_secs() + 60,
        project_id: Uuid::new_v4(),
    };
    let token = ph_auth::token::sign_for_tests(&second, &claims);
    assert!(keys.verify(&token, host_id, &clock).is_err());

    master.key_tx.lock().as_ref().unwrap().send(encoded_key(&second)).unwrap();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if keys.verify(&token, host_id, &clock).is_ok() {
            shutdown.cancel();
            return;
        }
    }
    panic!("broadcast key update never applied");
}

#[tokio::test]
async fn malformed_fetched_key_is_an_error() {
    let master = FakeMaster::default();
    *master.public_key.lock() = Some("not-a-key".into());
    let keys = Arc::new(KeyStore::new());
    let shutdown = CancellationToken::new();
    let result = install_verification_key(&master, &keys, &shutdown).await;
    assert!(matches!(result, Err(RegistrationError::BadKey(_))), "{result:?}");
}

#[tokio::test(start_paused = true)]
async fn heartbeats_tick_every_thirty_seconds() {
    let master = Arc::new(FakeMaster::default());
    let registration = HostRegistration {
        id: Uuid::new_v4(),
        name: "host-1".into(),
        region: "eu".into(),
        public_url: None,
        internal_url: None,
        ssh_server: None,
        sshpiperd_public_key: "ssh-ed25519 AAAA".into(),
        version: "0.2.0".into(),
        metadata: serde_json::Value::Null,
    };
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_heartbeat(
        master.clone() as Arc<dyn MasterApi>,
        registration,
        shutdown.clone(),
    ));

    // Allow registration to complete, then advance 95 virtual seconds:
    // three heartbeats.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(master.registered.lock().len(), 1);
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(master.heartbeats.load(Ordering::SeqCst), 3);

    shutdown.cancel();
    let _ = task.await;
}

#[tokio::test(start_paused = true)]
async fn token_guard_restores_a_vanished_file() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = Arc::new(Secrets::new(dir.path()));
    secrets.write_master_token("initial").unwrap();
    let master = Arc::new(FakeMaster::default());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_token_guard(
        secrets.clone(),
        master.clone() as Arc<dyn MasterApi>,
        Uuid::new_v4(),
        shutdown.clone(),
    ));

    // Present file: ticks do nothing.
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(master.rotations.load(Ordering::SeqCst), 0);

    // Delete the file; rotation fails first, then succeeds on a later tick.
    std::fs::remove_file(dir.path().join("master-conat-token")).unwrap();
    *master.fail_rotation.lock() = true;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(master.rotations.load(Ordering::SeqCst), 0);

    *master.fail_rotation.lock() = false;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(master.rotations.load(Ordering::SeqCst), 1);
    assert_eq!(secrets.master_token().unwrap(), Some("master-token-0".into()));

    shutdown.cancel();
    let _ = task.await;
}
