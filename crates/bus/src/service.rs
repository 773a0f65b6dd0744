// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Method-name RPC dispatch over the bus.
//!
//! Requests are `{name, args}` published to a service subject; the handler
//! registry validates the name against its method table and rejects unknown
//! names. Replies are `{ok, result}` / `{ok, error}` envelopes to the
//! caller's inbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{BusClient, BusError};

/// A `{name, args}` call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcReply {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type Handler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

/// A registry of typed method handlers.
#[derive(Default)]
pub struct RpcService {
    methods: HashMap<String, Handler>,
}

impl RpcService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Later registrations of the same name win.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: RpcRequest) -> Result<serde_json::Value, String> {
        match self.methods.get(&request.name) {
            Some(handler) => handler(request.args).await,
            None => Err(format!("unknown method {:?}", request.name)),
        }
    }

    /// Serve requests arriving on `subject` until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        client: Arc<BusClient>,
        subject: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Result<(), BusError> {
        let subject = subject.into();
        let mut sub = client.subscribe(subject.clone())?;
        debug!(%subject, "rpc service listening");
        loop {
            let msg = tokio::select! {
                msg = sub.next() => msg,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let Some(msg) = msg else { return Err(BusError::Closed) };
            let Some(reply) = msg.reply else {
                warn!(%subject, "rpc request without reply subject dropped");
                continue;
            };
            let service = Arc::clone(&self);
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let outcome = match serde_json::from_value::<RpcRequest>(msg.payload) {
                    Ok(request) => service.handle(request).await,
                    Err(e) => Err(format!("malformed rpc request: {e}")),
                };
                let envelope = match outcome {
                    Ok(result) => RpcReply { ok: true, result: Some(result), error: None },
                    Err(error) => RpcReply { ok: false, result: None, error: Some(error) },
                };
                let payload = serde_json::to_value(&envelope)
                    .unwrap_or(serde_json::Value::Null);
                let _ = client.publish(reply, payload);
            });
        }
    }

    /// Call a remote service method and unwrap its envelope.
    pub async fn call(
        client: &BusClient,
        subject: &str,
        name: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let payload = serde_json::to_value(RpcRequest { name: name.to_string(), args })
            .map_err(|e| BusError::Protocol(e.to_string()))?;
        let raw = client.request(subject, payload, timeout).await?;
        let reply: RpcReply =
            serde_json::from_value(raw).map_err(|e| BusError::Protocol(e.to_string()))?;
        if reply.ok {
            Ok(reply.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(BusError::Rpc(reply.error.unwrap_or_else(|| "unknown error".to_string())))
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
