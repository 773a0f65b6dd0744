// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routed project-host clients.
//!
//! A routed client is a bus connection authenticated to one
//! `(host, project)` pair via a master-minted bearer token. The host never
//! signs tokens; it asks the master (`issueProjectHostAuthToken`) and
//! caches the result until less than a minute of validity remains. Token
//! issuance is single-flight per pair, and a 401-class failure invalidates
//! the cache and rebuilds the client at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use ph_core::Clock;

use crate::client::{BusClient, BusError, ClientConfig};

/// Refresh when less than this much validity remains.
pub const TOKEN_REFRESH_LEEWAY_MS: u64 = 60_000;

/// A token minted by the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    pub token: String,
    /// Epoch ms.
    pub expires_at: u64,
}

/// The master's token-minting RPC.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_project_host_auth_token(
        &self,
        host_id: Uuid,
        project_id: Uuid,
    ) -> Result<MintedToken, BusError>;
}

#[derive(Default)]
struct TokenState {
    token: Option<MintedToken>,
}

struct RoutedEntry {
    /// Async mutex: the first caller mints while the rest queue, then
    /// observe the cached token (single-flight).
    token: Arc<tokio::sync::Mutex<TokenState>>,
    client: Option<Arc<BusClient>>,
}

/// Cache of routed clients and their tokens, keyed by `(host, project)`.
pub struct RoutedPool<C: Clock> {
    issuer: Arc<dyn TokenIssuer>,
    url: String,
    entries: Mutex<HashMap<(Uuid, Uuid), Arc<tokio::sync::Mutex<RoutedEntry>>>>,
    clock: C,
}

impl<C: Clock> RoutedPool<C> {
    pub fn new(issuer: Arc<dyn TokenIssuer>, url: impl Into<String>, clock: C) -> Self {
        Self { issuer, url: url.into(), entries: Mutex::new(HashMap::new()), clock }
    }

    /// The current token for a pair, minting or refreshing as needed.
    pub async fn token_for(
        &self,
        host_id: Uuid,
        project_id: Uuid,
    ) -> Result<MintedToken, BusError> {
        let entry = self.entry(host_id, project_id);
        let guard = entry.lock().await;
        let token = Arc::clone(&guard.token);
        drop(guard);

        let mut state = token.lock().await;
        if let Some(existing) = &state.token {
            if existing.expires_at.saturating_sub(self.clock.epoch_ms())
                >= TOKEN_REFRESH_LEEWAY_MS
            {
                return Ok(existing.clone());
            }
            debug!(%project_id, "routed token near expiry, refreshing");
        }
        let minted =
            self.issuer.issue_project_host_auth_token(host_id, project_id).await?;
        state.token = Some(minted.clone());
        Ok(minted)
    }

    /// A connected routed client for the pair, reusing a live one.
    pub async fn client(
        &self,
        host_id: Uuid,
        project_id: Uuid,
    ) -> Result<Arc<BusClient>, BusError> {
        let entry = self.entry(host_id, project_id);
        let mut guard = entry.lock().await;
        if let Some(client) = Self::live_client(&mut guard) {
            return Ok(client);
        }
        drop(guard);
        let token = self.token_for(host_id, project_id).await?;

        let mut guard = entry.lock().await;
        // A concurrent caller may have connected while the token was
        // minted; reuse its connection instead of dialing a duplicate.
        if let Some(client) = Self::live_client(&mut guard) {
            return Ok(client);
        }
        let client = Arc::new(
            BusClient::connect(ClientConfig {
                url: self.url.clone(),
                bearer: Some(token.token),
                ..Default::default()
            })
            .await?,
        );
        guard.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Request with the 401 recovery contract: on an auth-class failure the
    /// cached token is invalidated and the client rebuilt exactly once.
    pub async fn request(
        &self,
        host_id: Uuid,
        project_id: Uuid,
        subject: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let mut allow_token_retry = true;
        loop {
            // Auth failures can surface at connect time (stale token) or on
            // the request itself; both trigger the one-shot rebuild.
            let outcome = match self.client(host_id, project_id).await {
                Ok(client) => client.request(subject, payload.clone(), timeout).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth() && allow_token_retry => {
                    info!(%project_id, "routed request got auth error, rebuilding once");
                    allow_token_retry = false;
                    self.invalidate(host_id, project_id).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the cached token and client for a pair.
    pub async fn invalidate(&self, host_id: Uuid, project_id: Uuid) {
        let entry = self.entry(host_id, project_id);
        let mut guard = entry.lock().await;
        guard.client = None;
        guard.token.lock().await.token = None;
    }

    /// The cached client if it is still usable; clears a dead one.
    fn live_client(entry: &mut RoutedEntry) -> Option<Arc<BusClient>> {
        if let Some(client) = &entry.client {
            if !client.is_closed() {
                return Some(Arc::clone(client));
            }
            entry.client = None;
        }
        None
    }

    fn entry(&self, host_id: Uuid, project_id: Uuid) -> Arc<tokio::sync::Mutex<RoutedEntry>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry((host_id, project_id)).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(RoutedEntry {
                token: Arc::new(tokio::sync::Mutex::new(TokenState::default())),
                client: None,
            }))
        }))
    }
}

#[cfg(test)]
#[path = "routed_tests.rs"]
mod tests;
