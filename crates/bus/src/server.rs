// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The websocket bus server.
//!
//! Each connection authenticates once, is bound to its identity's inbox
//! prefix, and then publishes/subscribes through the ACL predicate. The
//! server holds the set of live connections; a connection owns its
//! identity and subscription table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ph_auth::acl::{Authorizer, OpKind};
use ph_core::{subject, AuthId, Clock};

use crate::auth::{AuthMaterial, BusAuth, BusAuthError};
use crate::protocol::{ClientFrame, ErrorCode, ServerFrame};
use crate::transport::BusSocket;

struct ConnHandle {
    identity: AuthId,
    tx: mpsc::UnboundedSender<ServerFrame>,
    /// sid → pattern
    subs: HashMap<u64, String>,
}

pub struct BusServer<C: Clock> {
    auth: BusAuth<C>,
    authorizer: Authorizer<C>,
    conns: Mutex<HashMap<u64, ConnHandle>>,
    next_conn_id: AtomicU64,
}

impl<C: Clock> BusServer<C> {
    pub fn new(auth: BusAuth<C>, authorizer: Authorizer<C>) -> Self {
        Self {
            auth,
            authorizer,
            conns: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    /// Flush the ACL caches (collaborator + decision, together).
    pub fn flush_acl(&self) {
        self.authorizer.flush();
    }

    /// Accept websocket connections on `listener` until shutdown. The same
    /// handling also runs behind the HTTPS proxy's upgrade route.
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.cancelled() => return,
            };
            match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "bus connection");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        use tokio_tungstenite::tungstenite::handshake::server::{
                            ErrorResponse, Request, Response,
                        };
                        let mut material = AuthMaterial::default();
                        let callback = |request: &Request,
                                        response: Response|
                         -> Result<Response, ErrorResponse> {
                            let header = |name: &str| {
                                request.headers().get(name).and_then(|v| v.to_str().ok())
                            };
                            material = AuthMaterial::from_request_parts(
                                header("authorization"),
                                header("cookie"),
                                request.uri().query(),
                            );
                            Ok(response)
                        };
                        let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
                        match accepted {
                            Ok(socket) => {
                                let _ = server.handle_connection(socket, material).await;
                            }
                            Err(e) => warn!(%e, "websocket handshake failed"),
                        }
                    });
                }
                Err(e) => warn!(%e, "bus accept error"),
            }
        }
    }

    /// Run one authenticated connection to completion.
    pub async fn handle_connection(
        &self,
        mut socket: impl BusSocket,
        material: AuthMaterial,
    ) -> Result<(), BusAuthError> {
        let identity = match self.auth.sign_in(&material).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(%e, "bus sign-in failed");
                send_frame(
                    &mut socket,
                    &ServerFrame::Err { code: ErrorCode::Auth, message: e.to_string() },
                )
                .await;
                socket.close().await;
                return Err(e);
            }
        };
        let inbox_prefix = identity.inbox_prefix();
        info!(%identity, "bus connection authenticated");

        // Register before the Welcome goes out: clients treat Welcome as
        // "connected" and may act on the connection immediately.
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.conns
            .lock()
            .insert(conn_id, ConnHandle { identity, tx, subs: HashMap::new() });

        send_frame(
            &mut socket,
            &ServerFrame::Welcome { identity, inbox_prefix: inbox_prefix.clone() },
        )
        .await;

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    // None means the handle was removed from the connection
                    // table (forced disconnect).
                    let Some(frame) = outgoing else { break };
                    if socket.send_text(frame_text(&frame)).await.is_err() {
                        break;
                    }
                }
                incoming = socket.recv_text() => {
                    let Some(Ok(text)) = incoming else { break };
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            self.handle_frame(conn_id, identity, &inbox_prefix, frame).await;
                        }
                        Err(e) => {
                            self.send_to(conn_id, ServerFrame::Err {
                                code: ErrorCode::BadFrame,
                                message: format!("unparseable frame: {e}"),
                            });
                        }
                    }
                }
            }
        }

        self.conns.lock().remove(&conn_id);
        debug!(%identity, "bus connection closed");
        Ok(())
    }

    async fn handle_frame(
        &self,
        conn_id: u64,
        identity: AuthId,
        inbox_prefix: &str,
        frame: ClientFrame,
    ) {
        match frame {
            ClientFrame::Ping => self.send_to(conn_id, ServerFrame::Pong),

            ClientFrame::Sub { sid, pattern } => {
                if !subject::is_valid_pattern(&pattern) {
                    self.send_to(conn_id, ServerFrame::Err {
                        code: ErrorCode::BadFrame,
                        message: format!("invalid pattern {pattern:?}"),
                    });
                    return;
                }
                if !self.authorizer.allow(identity, OpKind::Sub, &pattern).await {
                    self.send_to(conn_id, ServerFrame::Err {
                        code: ErrorCode::Permission,
                        message: format!("subscribe to {pattern:?} denied"),
                    });
                    return;
                }
                if let Some(conn) = self.conns.lock().get_mut(&conn_id) {
                    conn.subs.insert(sid, pattern);
                }
            }

            ClientFrame::Unsub { sid } => {
                if let Some(conn) = self.conns.lock().get_mut(&conn_id) {
                    conn.subs.remove(&sid);
                }
            }

            ClientFrame::Pub { subject: subj, reply, payload, seq } => {
                if !subject::is_valid_subject(&subj) {
                    self.send_to(conn_id, ServerFrame::Err {
                        code: ErrorCode::BadFrame,
                        message: format!("invalid subject {subj:?}"),
                    });
                    return;
                }
                // Reply subjects must carry the authenticated identity's
                // inbox prefix; anything else could steal responses.
                if let Some(reply) = &reply {
                    if !reply.starts_with(inbox_prefix) {
                        self.send_to(conn_id, ServerFrame::Err {
                            code: ErrorCode::Permission,
                            message: "reply subject outside own inbox".to_string(),
                        });
                        return;
                    }
                }
                if !self.authorizer.allow(identity, OpKind::Pub, &subj).await {
                    self.send_to(conn_id, ServerFrame::Err {
                        code: ErrorCode::Permission,
                        message: format!("publish to {subj:?} denied"),
                    });
                    return;
                }
                self.route(&subj, reply, payload, seq);
            }
        }
    }

    /// Deliver a message to every matching subscription.
    fn route(
        &self,
        subj: &str,
        reply: Option<String>,
        payload: serde_json::Value,
        seq: Option<u64>,
    ) {
        let conns = self.conns.lock();
        for conn in conns.values() {
            for (sid, pattern) in &conn.subs {
                if subject::subject_matches(pattern, subj) {
                    let _ = conn.tx.send(ServerFrame::Msg {
                        sid: *sid,
                        subject: subj.to_string(),
                        reply: reply.clone(),
                        payload: payload.clone(),
                        seq,
                    });
                }
            }
        }
    }

    fn send_to(&self, conn_id: u64, frame: ServerFrame) {
        if let Some(conn) = self.conns.lock().get(&conn_id) {
            let _ = conn.tx.send(frame);
        }
    }

    /// Force-close every connection authenticated as `account_id`
    /// (revocation kick). Returns how many were dropped.
    pub fn disconnect_account(&self, account_id: uuid::Uuid) -> usize {
        let mut conns = self.conns.lock();
        let doomed: Vec<u64> = conns
            .iter()
            .filter(|(_, c)| c.identity == AuthId::Account(account_id))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            conns.remove(id);
        }
        doomed.len()
    }
}

fn frame_text(frame: &ServerFrame) -> String {
    serde_json::to_string(frame).unwrap_or_else(|_| {
        r#"{"type":"err","code":"bad_frame","message":"serialization failed"}"#.to_string()
    })
}

async fn send_frame(socket: &mut impl BusSocket, frame: &ServerFrame) {
    let _ = socket.send_text(frame_text(frame)).await;
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
