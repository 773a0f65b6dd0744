// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master registration: token bootstrap/rotation, key installation,
//! register + heartbeat, and the 30 s credential check tick.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use ph_auth::KeyStore;
use ph_store::Secrets;

use super::{HostRegistration, MasterApi};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("no master token and no bootstrap token; cannot authenticate")]
    NoCredentials,

    #[error("master rpc failed: {0}")]
    Rpc(String),

    #[error("secrets error: {0}")]
    Secrets(String),

    #[error("bad verification key: {0}")]
    BadKey(String),
}

/// The current master bearer token, rotating via the bootstrap token on a
/// fresh host. The rotated token is persisted before it is used.
pub async fn ensure_master_token(
    secrets: &Secrets,
    master: &dyn MasterApi,
    host_id: Uuid,
) -> Result<String, RegistrationError> {
    if let Some(token) =
        secrets.master_token().map_err(|e| RegistrationError::Secrets(e.to_string()))?
    {
        return Ok(token);
    }
    let bootstrap = secrets
        .bootstrap_token()
        .map_err(|e| RegistrationError::Secrets(e.to_string()))?
        .ok_or(RegistrationError::NoCredentials)?;
    info!("no master token on disk, rotating via bootstrap token");
    let fresh = master
        .rotate_master_token(host_id, &bootstrap)
        .await
        .map_err(|e| RegistrationError::Rpc(e.to_string()))?;
    secrets
        .write_master_token(&fresh)
        .map_err(|e| RegistrationError::Secrets(e.to_string()))?;
    Ok(fresh)
}

/// Fetch and install the routed-token verification key, then keep applying
/// broadcast updates until shutdown.
pub async fn install_verification_key(
    master: &dyn MasterApi,
    keys: &Arc<KeyStore>,
    shutdown: &CancellationToken,
) -> Result<(), RegistrationError> {
    let public_key = master
        .fetch_auth_public_key()
        .await
        .map_err(|e| RegistrationError::Rpc(e.to_string()))?;
    keys.install_base64(&public_key)
        .map_err(|e| RegistrationError::BadKey(e.to_string()))?;
    info!("installed project-host auth public key");

    let mut updates =
        master.key_updates().await.map_err(|e| RegistrationError::Rpc(e.to_string()))?;
    let keys = Arc::clone(keys);
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                update = updates.recv() => update,
                _ = shutdown.cancelled() => return,
            };
            let Some(update) = update else { return };
            match keys.install_base64(&update) {
                Ok(()) => info!("applied broadcast key update"),
                Err(e) => warn!(%e, "ignoring malformed broadcast key"),
            }
        }
    });
    Ok(())
}

/// Publish `register`, then heartbeat every 30 s until shutdown.
pub async fn run_heartbeat(
    master: Arc<dyn MasterApi>,
    registration: HostRegistration,
    shutdown: CancellationToken,
) {
    match master.register_host(&registration).await {
        Ok(()) => info!(host_id = %registration.id, "registered with master"),
        Err(e) => warn!(%e, "initial registration failed; heartbeating anyway"),
    }
    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
            _ = shutdown.cancelled() => return,
        }
        if let Err(e) = master.heartbeat(registration.id).await {
            warn!(%e, "heartbeat failed");
        }
    }
}

/// Every 30 s, confirm the on-disk master token still exists. If it
/// vanished (and was not injected via environment), rotate: the old token
/// is gone and must never be reused, so a failed rotation just retries on
/// the next tick.
pub async fn run_token_guard(
    secrets: Arc<Secrets>,
    master: Arc<dyn MasterApi>,
    host_id: Uuid,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(TOKEN_CHECK_INTERVAL) => {}
            _ = shutdown.cancelled() => return,
        }
        if secrets.master_token_is_injected() {
            continue;
        }
        let missing = matches!(secrets.master_token(), Ok(None));
        if !missing {
            continue;
        }
        warn!("master token file vanished; requesting rotation");
        let presented = secrets.bootstrap_token().ok().flatten().unwrap_or_default();
        match master.rotate_master_token(host_id, &presented).await {
            Ok(fresh) => match secrets.write_master_token(&fresh) {
                Ok(()) => info!("master token restored"),
                Err(e) => warn!(%e, "failed to persist rotated token"),
            },
            Err(e) => warn!(%e, "token rotation failed; will retry next tick"),
        }
    }
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod tests;
