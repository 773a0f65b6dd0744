// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticating HTTP/WS reverse proxy.
//!
//! Requests shaped `/<project_id>/proxy/<port>/…` are authorized (session
//! cookie or bearer token), then forwarded to the workspace container.
//! The bus rides the same listener at `/conat`. Fresh bearers are upgraded
//! to long-lived session cookies; query-parameter tokens are stripped
//! before anything is forwarded.

pub mod authorize;
pub mod sockets;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tracing::{debug, warn};
use uuid::Uuid;

use ph_auth::AUTH_QUERY_PARAM;
use ph_bus::{AuthMaterial, BusServer};
use ph_core::Clock;

use crate::adapters::ContainerRuntime;
use crate::leases::ContainerLeases;

pub use authorize::{AuthGates, Authorized, Denial};
pub use sockets::{AxumSocket, WsTracker};

/// Cap on buffered request/response bodies.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub struct ProxyState<C: Clock> {
    pub gates: Arc<AuthGates<C>>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub leases: ContainerLeases,
    pub sockets: WsTracker,
    pub bus: Arc<BusServer<C>>,
    pub https: bool,
    pub session_ttl_secs: u64,
    pub http: reqwest::Client,
}

/// The host's single listener: bus upgrade plus the authorizing proxy.
pub fn router<C: Clock>(state: Arc<ProxyState<C>>) -> Router {
    Router::new()
        .route("/conat", any(conat_ws::<C>))
        .fallback(proxy_entry::<C>)
        .with_state(state)
}

/// `/conat`: authenticate from the upgrade request, then hand the socket
/// to the bus server.
async fn conat_ws<C: Clock>(
    State(state): State<Arc<ProxyState<C>>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let material = AuthMaterial::from_request_parts(
        header_str(&headers, "authorization"),
        header_str(&headers, "cookie"),
        uri.query(),
    );
    ws.on_upgrade(move |socket| async move {
        let _ = state.bus.handle_connection(AxumSocket(socket), material).await;
    })
}

async fn proxy_entry<C: Clock>(
    State(state): State<Arc<ProxyState<C>>>,
    ws: Option<WebSocketUpgrade>,
    req: Request,
) -> Response {
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let query = uri.query().map(String::from);
    let method = req.method().clone();
    let headers = req.headers().clone();

    let Some((project_id, port, rest)) = parse_target(&path) else {
        return plain(StatusCode::NOT_FOUND, "no such route");
    };

    let authorized = match state.gates.authorize(
        header_str(&headers, "cookie"),
        header_str(&headers, "authorization"),
        query.as_deref(),
        project_id,
    ) {
        Ok(authorized) => authorized,
        Err(Denial::Unauthorized { clear_cookie }) => {
            let mut response = plain(StatusCode::UNAUTHORIZED, "unauthorized");
            if clear_cookie {
                set_cookie(
                    &mut response,
                    &clear_session_cookie(&state.gates.session_cookie, state.https),
                );
            }
            return response;
        }
        Err(Denial::Forbidden) => return plain(StatusCode::FORBIDDEN, "not a collaborator"),
    };

    let fresh_cookie = authorized.fresh_bearer.then(|| {
        let token = state.gates.session_key.issue(
            authorized.account_id,
            state.session_ttl_secs,
            &state.gates.clock,
        );
        session_cookie_header(
            &state.gates.session_cookie,
            &token,
            state.session_ttl_secs,
            state.https,
        )
    });

    let forward_query = query.as_deref().and_then(|q| strip_query_param(q, AUTH_QUERY_PARAM));

    // Token-in-query + idempotent method: redirect to the clean URL so the
    // token never lands in logs or referrers. Other methods keep their
    // bodies and just strip the parameter before forwarding.
    if authorized.from_query && (method == Method::GET || method == Method::HEAD) {
        let location = match &forward_query {
            Some(q) => format!("{path}?{q}"),
            None => path.clone(),
        };
        let mut response = plain(StatusCode::FOUND, "");
        if let Ok(value) = HeaderValue::from_str(&location) {
            response.headers_mut().insert(header::LOCATION, value);
        }
        if let Some(cookie) = &fresh_cookie {
            set_cookie(&mut response, cookie);
        }
        return response;
    }

    // Hold a container lease for the lifetime of the operation; the
    // container stays up while any request or socket references it.
    let lease = match state.leases.acquire(project_id).await {
        Ok(lease) => lease,
        Err(e) => {
            warn!(%e, %project_id, "container lease failed");
            return plain(StatusCode::BAD_GATEWAY, "workspace not available");
        }
    };
    let upstream = match state.containers.upstream_addr(project_id, port).await {
        Ok(addr) => addr,
        Err(e) => {
            warn!(%e, %project_id, port, "no upstream for project");
            return plain(StatusCode::BAD_GATEWAY, "workspace not reachable");
        }
    };

    if let Some(ws) = ws {
        // Identity was captured above; cookies cannot be set after the
        // upgrade response.
        let upstream_url = match &forward_query {
            Some(q) => format!("ws://{upstream}/{rest}?{q}"),
            None => format!("ws://{upstream}/{rest}"),
        };
        let tracker = state.sockets.clone();
        let (socket_id, cancel) =
            tracker.register(authorized.account_id, authorized.iat_secs);
        debug!(socket_id, %project_id, "tracking upgraded websocket");
        return ws.on_upgrade(move |socket| async move {
            sockets::bridge_websockets(socket, upstream_url, cancel).await;
            tracker.remove(socket_id);
            drop(lease);
        });
    }

    let mut response =
        forward_http(&state, method, &headers, &upstream, &rest, forward_query.as_deref(), req)
            .await;
    if let Some(cookie) = &fresh_cookie {
        set_cookie(&mut response, cookie);
    }
    drop(lease);
    response
}

async fn forward_http<C: Clock>(
    state: &Arc<ProxyState<C>>,
    method: Method,
    headers: &HeaderMap,
    upstream: &str,
    rest: &str,
    query: Option<&str>,
    req: Request,
) -> Response {
    let url = match query {
        Some(q) => format!("http://{upstream}/{rest}?{q}"),
        None => format!("http://{upstream}/{rest}"),
    };
    let body = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return plain(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
    };

    let mut builder = state.http.request(method, url.as_str());
    for (name, value) in headers {
        if !is_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    let upstream_response = match builder.body(body).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(%e, %url, "upstream request failed");
            return plain(StatusCode::BAD_GATEWAY, "upstream request failed");
        }
    };

    let status = upstream_response.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        if !is_hop_header(name.as_str()) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(%e, "upstream body read failed");
            return plain(StatusCode::BAD_GATEWAY, "upstream body read failed");
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// `/<project_id>/proxy/<port>/rest…` → target triple.
pub fn parse_target(path: &str) -> Option<(Uuid, u16, String)> {
    let mut parts = path.trim_start_matches('/').splitn(4, '/');
    let project_id = Uuid::parse_str(parts.next()?).ok()?;
    if parts.next()? != "proxy" {
        return None;
    }
    let port: u16 = parts.next()?.parse().ok()?;
    let rest = parts.next().unwrap_or("").to_string();
    Some((project_id, port, rest))
}

/// Remove one query parameter; `None` when nothing remains.
pub fn strip_query_param(query: &str, name: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| pair.split('=').next() != Some(name))
        .filter(|pair| !pair.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

/// `Set-Cookie` value for a fresh session under the host's cookie name.
pub fn session_cookie_header(name: &str, token: &str, ttl_secs: u64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that drops the session.
pub fn clear_session_cookie(name: &str, secure: bool) -> String {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn is_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
