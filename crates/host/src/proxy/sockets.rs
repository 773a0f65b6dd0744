// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upgraded-websocket tracking and the revocation sweep.
//!
//! Identity is captured at upgrade time; cookies cannot be set afterwards.
//! A background sweep walks the set and force-closes sockets whose account
//! has since been revoked. Closed sockets remove themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use ph_bus::transport::{BusSocket, SocketError};
use ph_core::Clock;

use super::authorize::AuthGates;

struct Tracked {
    account_id: Uuid,
    iat_secs: u64,
    cancel: CancellationToken,
}

/// The set of live upgraded sockets.
#[derive(Clone, Default)]
pub struct WsTracker {
    inner: Arc<Mutex<HashMap<u64, Tracked>>>,
    next_id: Arc<AtomicU64>,
}

impl WsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a socket; the returned token is cancelled when the account is
    /// revoked.
    pub fn register(&self, account_id: Uuid, iat_secs: u64) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.inner
            .lock()
            .insert(id, Tracked { account_id, iat_secs, cancel: cancel.clone() });
        (id, cancel.clone())
    }

    pub fn remove(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// One sweep: close every socket whose identity now fails the
    /// revocation check. Returns how many were kicked.
    pub fn sweep<C: Clock>(&self, gates: &AuthGates<C>) -> usize {
        let doomed: Vec<(u64, CancellationToken)> = {
            let inner = self.inner.lock();
            inner
                .iter()
                .filter(|(_, t)| gates.is_revoked(t.account_id, t.iat_secs))
                .map(|(id, t)| (*id, t.cancel.clone()))
                .collect()
        };
        for (id, cancel) in &doomed {
            debug!(socket = id, "closing revoked websocket");
            cancel.cancel();
        }
        if !doomed.is_empty() {
            info!(count = doomed.len(), "revocation sweep closed sockets");
        }
        doomed.len()
    }

    /// Periodic sweep (default 30 s).
    pub async fn run_sweep_loop<C: Clock>(
        self,
        gates: Arc<AuthGates<C>>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => return,
            }
            self.sweep(&gates);
        }
    }
}

/// Adapter: axum's upgraded websocket as a bus socket.
pub struct AxumSocket(pub axum::extract::ws::WebSocket);

#[async_trait]
impl BusSocket for AxumSocket {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError> {
        use axum::extract::ws::Message;
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SocketError::Ws(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, SocketError>> {
        use axum::extract::ws::Message;
        loop {
            match self.0.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                // axum answers pings itself.
                Ok(_) => {}
                Err(e) => return Some(Err(SocketError::Ws(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        use futures_util::SinkExt;
        let _ = SinkExt::close(&mut self.0).await;
    }
}

/// Pump frames between an upgraded client socket and the project's
/// upstream websocket until either side closes, the revocation sweep
/// cancels us, or an error occurs.
pub async fn bridge_websockets(
    client: axum::extract::ws::WebSocket,
    upstream_url: String,
    cancel: CancellationToken,
) {
    use axum::extract::ws::Message as AxMsg;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as TsMsg;

    let (upstream, _) = match tokio_tungstenite::connect_async(&upstream_url).await {
        Ok(ok) => ok,
        Err(e) => {
            debug!(%e, url = %upstream_url, "upstream websocket connect failed");
            return;
        }
    };
    let (mut up_tx, mut up_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client_tx.close().await;
                let _ = up_tx.close().await;
                return;
            }
            from_client = client_rx.next() => {
                let Some(Ok(msg)) = from_client else { break };
                let forward = match msg {
                    AxMsg::Text(t) => TsMsg::text(t.to_string()),
                    AxMsg::Binary(b) => TsMsg::Binary(b),
                    AxMsg::Ping(p) => TsMsg::Ping(p),
                    AxMsg::Pong(p) => TsMsg::Pong(p),
                    AxMsg::Close(_) => break,
                };
                if up_tx.send(forward).await.is_err() {
                    break;
                }
            }
            from_upstream = up_rx.next() => {
                let Some(Ok(msg)) = from_upstream else { break };
                let forward = match msg {
                    TsMsg::Text(t) => AxMsg::Text(t.to_string().into()),
                    TsMsg::Binary(b) => AxMsg::Binary(b),
                    TsMsg::Ping(p) => AxMsg::Ping(p),
                    TsMsg::Pong(p) => AxMsg::Pong(p),
                    TsMsg::Close(_) => break,
                    TsMsg::Frame(_) => continue,
                };
                if client_tx.send(forward).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = client_tx.close().await;
    let _ = up_tx.close().await;
}

#[cfg(test)]
#[path = "sockets_tests.rs"]
mod tests;
