// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus client: websocket connection with request/reply over inbox
//! subjects, subscriptions as channels, and seq-checked streamed replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, warn};
use uuid::Uuid;

use ph_core::{normalize_url, AuthId};

use crate::protocol::{ClientFrame, ErrorCode, ServerFrame};
use crate::transport::BusSocket;

#[derive(Debug, Error, Clone)]
pub enum BusError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    Denied(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("missed stream response: expected seq {expected}, got {got}")]
    MissedStream { expected: u64, got: u64 },

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Rpc(String),
}

impl BusError {
    /// 401-class errors that justify a token refresh + one rebuild.
    pub fn is_auth(&self) -> bool {
        matches!(self, BusError::Auth(_))
    }
}

/// How to reach and authenticate against a bus server.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// `http(s)://` or `ws(s)://` URL of the bus endpoint.
    pub url: String,
    pub bearer: Option<String>,
    pub system_cookie: Option<String>,
    /// Project identity: id + secret.
    pub project: Option<(Uuid, String)>,
    pub connect_timeout: Option<Duration>,
}

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct BusMsg {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: serde_json::Value,
    pub seq: Option<u64>,
}

/// A live subscription; dropping it unsubscribes.
pub struct Subscription {
    sid: u64,
    pub rx: mpsc::UnboundedReceiver<BusMsg>,
    out: mpsc::UnboundedSender<ClientFrame>,
    state: Arc<ClientState>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<BusMsg> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.subs.lock().remove(&self.sid);
        let _ = self.out.send(ClientFrame::Unsub { sid: self.sid });
    }
}

struct ClientState {
    subs: Mutex<HashMap<u64, mpsc::UnboundedSender<BusMsg>>>,
    next_sid: AtomicU64,
    errors: broadcast::Sender<(ErrorCode, String)>,
    auth_failed: AtomicBool,
    closed: AtomicBool,
}

pub struct BusClient {
    identity: AuthId,
    inbox_prefix: String,
    out: mpsc::UnboundedSender<ClientFrame>,
    state: Arc<ClientState>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl BusClient {
    /// Connect and authenticate. The handshake must produce a `Welcome`
    /// frame within the connect budget; a typed `Err` frame maps to
    /// [`BusError::Auth`].
    pub async fn connect(config: ClientConfig) -> Result<Self, BusError> {
        let budget = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let request = build_request(&config)?;
        let (socket, _response) =
            tokio::time::timeout(budget, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| BusError::Timeout(budget))?
                .map_err(|e| BusError::Transport(e.to_string()))?;
        Self::from_socket(socket, budget).await
    }

    /// Complete the bus handshake over an established socket.
    pub async fn from_socket(
        mut socket: impl BusSocket + 'static,
        budget: Duration,
    ) -> Result<Self, BusError> {
        let first = tokio::time::timeout(budget, socket.recv_text())
            .await
            .map_err(|_| BusError::Timeout(budget))?
            .ok_or(BusError::Closed)?
            .map_err(|e| BusError::Transport(e.to_string()))?;
        let (identity, inbox_prefix) = match serde_json::from_str::<ServerFrame>(&first) {
            Ok(ServerFrame::Welcome { identity, inbox_prefix }) => (identity, inbox_prefix),
            Ok(ServerFrame::Err { message, .. }) => return Err(BusError::Auth(message)),
            Ok(other) => {
                return Err(BusError::Protocol(format!("expected welcome, got {other:?}")))
            }
            Err(e) => return Err(BusError::Protocol(e.to_string())),
        };

        let (out, out_rx) = mpsc::unbounded_channel();
        let (errors, _) = broadcast::channel(16);
        let state = Arc::new(ClientState {
            subs: Mutex::new(HashMap::new()),
            next_sid: AtomicU64::new(1),
            errors,
            auth_failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let task = tokio::spawn(run_socket(socket, out_rx, Arc::clone(&state)));
        Ok(Self { identity, inbox_prefix, out, state, task })
    }

    pub fn identity(&self) -> AuthId {
        self.identity
    }

    pub fn inbox_prefix(&self) -> &str {
        &self.inbox_prefix
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// True once the server reported an auth-class error.
    pub fn is_auth_failed(&self) -> bool {
        self.state.auth_failed.load(Ordering::SeqCst)
    }

    /// Subscribe to a subject pattern.
    pub fn subscribe(&self, pattern: impl Into<String>) -> Result<Subscription, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let sid = self.state.next_sid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subs.lock().insert(sid, tx);
        self.out
            .send(ClientFrame::Sub { sid, pattern: pattern.into() })
            .map_err(|_| BusError::Closed)?;
        Ok(Subscription { sid, rx, out: self.out.clone(), state: Arc::clone(&self.state) })
    }

    /// Fire-and-forget publish.
    pub fn publish(
        &self,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), BusError> {
        self.publish_with_seq(subject, payload, None)
    }

    /// Publish one chunk of a streamed response. Streams number chunks from
    /// 0 and finish with a null payload.
    pub fn publish_with_seq(
        &self,
        subject: impl Into<String>,
        payload: serde_json::Value,
        seq: Option<u64>,
    ) -> Result<(), BusError> {
        self.out
            .send(ClientFrame::Pub { subject: subject.into(), reply: None, payload, seq })
            .map_err(|_| BusError::Closed)
    }

    /// Single-turn request/reply over a fresh inbox subject.
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let reply = self.new_reply_subject();
        let mut sub = self.subscribe(reply.clone())?;
        let mut errors = self.state.errors.subscribe();
        self.out
            .send(ClientFrame::Pub { subject: subject.into(), reply: Some(reply), payload, seq: None })
            .map_err(|_| BusError::Closed)?;

        tokio::select! {
            msg = sub.next() => msg.map(|m| m.payload).ok_or(BusError::Closed),
            err = errors.recv() => Err(error_from_frame(err)),
            _ = tokio::time::sleep(timeout) => Err(BusError::Timeout(timeout)),
        }
        // `sub` drops here, releasing the inbox subscription either way.
    }

    /// Streamed request: ordered `seq` chunks, terminated by a null
    /// payload. A sequence gap is the hard error `MissedStream`.
    pub async fn request_stream(
        &self,
        subject: impl Into<String>,
        payload: serde_json::Value,
        idle_timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<Result<serde_json::Value, BusError>>, BusError> {
        let reply = self.new_reply_subject();
        let mut sub = self.subscribe(reply.clone())?;
        self.out
            .send(ClientFrame::Pub { subject: subject.into(), reply: Some(reply), payload, seq: None })
            .map_err(|_| BusError::Closed)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut expected = 0u64;
            loop {
                let msg = match tokio::time::timeout(idle_timeout, sub.next()).await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        let _ = tx.send(Err(BusError::Closed));
                        return;
                    }
                    Err(_) => {
                        let _ = tx.send(Err(BusError::Timeout(idle_timeout)));
                        return;
                    }
                };
                let got = msg.seq.unwrap_or(expected);
                if got != expected {
                    let _ = tx.send(Err(BusError::MissedStream { expected, got }));
                    return;
                }
                expected += 1;
                if msg.payload.is_null() {
                    // Empty payload terminates the stream.
                    return;
                }
                if tx.send(Ok(msg.payload)).is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn new_reply_subject(&self) -> String {
        format!("{}.{}", self.inbox_prefix, nanoid::nanoid!(12))
    }
}

fn error_from_frame(
    err: Result<(ErrorCode, String), broadcast::error::RecvError>,
) -> BusError {
    match err {
        Ok((ErrorCode::Auth, message)) => BusError::Auth(message),
        Ok((ErrorCode::Permission, message)) => BusError::Denied(message),
        Ok((ErrorCode::BadFrame, message)) => BusError::Protocol(message),
        Err(_) => BusError::Closed,
    }
}

async fn run_socket(
    mut socket: impl BusSocket,
    mut out_rx: mpsc::UnboundedReceiver<ClientFrame>,
    state: Arc<ClientState>,
) {
    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(frame) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if socket.send_text(text).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv_text() => {
                let Some(Ok(text)) = incoming else { break };
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Msg { sid, subject, reply, payload, seq }) => {
                        let tx = state.subs.lock().get(&sid).cloned();
                        if let Some(tx) = tx {
                            let _ = tx.send(BusMsg { subject, reply, payload, seq });
                        }
                    }
                    Ok(ServerFrame::Err { code, message }) => {
                        warn!(%code, %message, "bus server error");
                        if code == ErrorCode::Auth {
                            state.auth_failed.store(true, Ordering::SeqCst);
                        }
                        let _ = state.errors.send((code, message));
                        if code == ErrorCode::Auth {
                            break;
                        }
                    }
                    Ok(ServerFrame::Welcome { .. }) | Ok(ServerFrame::Pong) => {}
                    Err(e) => debug!(%e, "unparseable server frame"),
                }
            }
        }
    }
    state.closed.store(true, Ordering::SeqCst);
    state.subs.lock().clear();
    socket.close().await;
}

fn build_request(
    config: &ClientConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, BusError> {
    let url = ws_url(&config.url);
    let mut request =
        url.into_client_request().map_err(|e| BusError::Transport(e.to_string()))?;
    let headers = request.headers_mut();
    if let Some(bearer) = &config.bearer {
        let value = HeaderValue::from_str(&format!("Bearer {bearer}"))
            .map_err(|e| BusError::Transport(e.to_string()))?;
        headers.insert("authorization", value);
    }
    let mut cookies = Vec::new();
    if let Some(password) = &config.system_cookie {
        cookies.push(format!("{}={password}", ph_auth::SYSTEM_COOKIE));
    }
    if let Some((project_id, secret)) = &config.project {
        cookies.push(format!("{}={project_id}", ph_auth::PROJECT_ID_COOKIE));
        cookies.push(format!("{}={secret}", ph_auth::PROJECT_SECRET_COOKIE));
    }
    if !cookies.is_empty() {
        let value = HeaderValue::from_str(&cookies.join("; "))
            .map_err(|e| BusError::Transport(e.to_string()))?;
        headers.insert("cookie", value);
    }
    Ok(request)
}

/// Convert an http(s) URL into its ws(s) form.
fn ws_url(url: &str) -> String {
    let normalized = normalize_url(url);
    if let Some(rest) = normalized.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = normalized.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        normalized
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
