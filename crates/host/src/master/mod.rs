// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master as the host sees it: one RPC surface (`hub.api`) plus a key
//! broadcast subject. Everything is behind [`MasterApi`] so the
//! registration loop, tunnel supervisor, and credential cache can be
//! tested against a fake.

pub mod control;
pub mod registration;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use ph_bus::{BusClient, BusError, ClientConfig, MintedToken, RpcService, TokenIssuer};

use crate::creds::{CredentialRegistry, CredsError};
use crate::tunnel::{ReverseTunnelConfig, TunnelError, TunnelRegistrar};

/// Subject of the master's API service.
pub const MASTER_API_SUBJECT: &str = "hub.api";

/// Broadcast subject carrying replacement token-verification keys.
pub const KEY_BROADCAST_SUBJECT: &str = "hub.keys.project-host";

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// What `register` publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRegistration {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_server: Option<String>,
    pub sshpiperd_public_key: String,
    pub version: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The master-side operations the host depends on.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// Exchange the presented credential (bootstrap or current token) for a
    /// fresh master bearer token.
    async fn rotate_master_token(
        &self,
        host_id: Uuid,
        presented: &str,
    ) -> Result<String, BusError>;

    /// The verify-only public key for routed project-host tokens.
    async fn fetch_auth_public_key(&self) -> Result<String, BusError>;

    async fn register_host(&self, registration: &HostRegistration) -> Result<(), BusError>;

    async fn heartbeat(&self, host_id: Uuid) -> Result<(), BusError>;

    /// Stream of replacement public keys from the broadcast subject.
    async fn key_updates(&self) -> Result<mpsc::UnboundedReceiver<String>, BusError>;
}

/// Bus-backed master client.
pub struct BusMaster {
    client: Arc<BusClient>,
}

impl BusMaster {
    /// Connect to the master's bus. `bearer` is the current master token,
    /// absent on a fresh host (the auth callback then presents nothing and
    /// the connection is limited to bootstrap rotation).
    pub async fn connect(url: &str, bearer: Option<String>) -> Result<Self, BusError> {
        let client = BusClient::connect(ClientConfig {
            url: url.to_string(),
            bearer,
            ..Default::default()
        })
        .await?;
        Ok(Self { client: Arc::new(client) })
    }

    pub fn from_client(client: Arc<BusClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<BusClient> {
        Arc::clone(&self.client)
    }

    async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BusError> {
        RpcService::call(&self.client, MASTER_API_SUBJECT, name, args, RPC_TIMEOUT).await
    }
}

#[async_trait]
impl MasterApi for BusMaster {
    async fn rotate_master_token(
        &self,
        host_id: Uuid,
        presented: &str,
    ) -> Result<String, BusError> {
        let result = self
            .call(
                "rotateMasterConatToken",
                serde_json::json!({ "host_id": host_id, "token": presented }),
            )
            .await?;
        result["token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| BusError::Protocol("rotation reply missing token".into()))
    }

    async fn fetch_auth_public_key(&self) -> Result<String, BusError> {
        let result = self.call("getProjectHostAuthPublicKey", serde_json::json!({})).await?;
        result["public_key"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| BusError::Protocol("key reply missing public_key".into()))
    }

    async fn register_host(&self, registration: &HostRegistration) -> Result<(), BusError> {
        let args = serde_json::to_value(registration)
            .map_err(|e| BusError::Protocol(e.to_string()))?;
        self.call("register", args).await.map(|_| ())
    }

    async fn heartbeat(&self, host_id: Uuid) -> Result<(), BusError> {
        self.client
            .publish("heartbeats.hosts", serde_json::json!({ "host_id": host_id }))
    }

    async fn key_updates(&self) -> Result<mpsc::UnboundedReceiver<String>, BusError> {
        let mut sub = self.client.subscribe(KEY_BROADCAST_SUBJECT)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                if let Some(key) = msg.payload["public_key"].as_str() {
                    if tx.send(key.to_string()).is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl TokenIssuer for BusMaster {
    async fn issue_project_host_auth_token(
        &self,
        host_id: Uuid,
        project_id: Uuid,
    ) -> Result<MintedToken, BusError> {
        let result = self
            .call(
                "issueProjectHostAuthToken",
                serde_json::json!({ "host_id": host_id, "project_id": project_id }),
            )
            .await?;
        let token = result["token"].as_str().map(String::from);
        let expires_at = result["expires_at"].as_u64();
        match (token, expires_at) {
            (Some(token), Some(expires_at)) => Ok(MintedToken { token, expires_at }),
            _ => Err(BusError::Protocol("token reply missing fields".into())),
        }
    }
}

#[async_trait]
impl TunnelRegistrar for BusMaster {
    async fn register_tunnel(
        &self,
        host_id: Uuid,
        public_key: &str,
    ) -> Result<ReverseTunnelConfig, TunnelError> {
        let result = self
            .call(
                "registerOnPremTunnel",
                serde_json::json!({ "host_id": host_id, "public_key": public_key }),
            )
            .await
            .map_err(|e| TunnelError::Registration(e.to_string()))?;
        serde_json::from_value(result).map_err(|e| TunnelError::Registration(e.to_string()))
    }
}

#[async_trait]
impl CredentialRegistry for BusMaster {
    async fn exists(&self, account_id: Uuid) -> Result<bool, CredsError> {
        let result = self
            .call("codexCredentialExists", serde_json::json!({ "account_id": account_id }))
            .await
            .map_err(|e| CredsError::Registry(e.to_string()))?;
        Ok(result["exists"].as_bool().unwrap_or(false))
    }

    async fn pull(&self, account_id: Uuid) -> Result<Option<String>, CredsError> {
        let result = self
            .call("codexCredentialPull", serde_json::json!({ "account_id": account_id }))
            .await
            .map_err(|e| CredsError::Registry(e.to_string()))?;
        Ok(result["auth_json"].as_str().map(String::from))
    }

    async fn push(&self, account_id: Uuid, auth_json: &str) -> Result<(), CredsError> {
        self.call(
            "codexCredentialPush",
            serde_json::json!({
                "provider": "openai",
                "kind": "codex-subscription-auth-json",
                "scope": "account",
                "owner_account_id": account_id,
                "auth_json": auth_json,
            }),
        )
        .await
        .map(|_| ())
        .map_err(|e| CredsError::Registry(e.to_string()))
    }

    async fn notify_used(&self, account_id: Uuid) {
        let _ = self
            .call("codexCredentialUsed", serde_json::json!({ "account_id": account_id }))
            .await;
    }
}
