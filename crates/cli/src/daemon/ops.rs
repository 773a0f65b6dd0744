// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus-backed execution of `workspace.file.*` actions.
//!
//! Contexts are keyed by a stable hash of the auth-affecting globals, so
//! concurrent CLI invocations with identical credentials share one
//! authenticated bus connection. Contexts live until daemon shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use ph_bus::{BusClient, BusError, ClientConfig, RpcService};
use ph_wire::{Action, AuthGlobals, Request};

use super::{ActionExecutor, OpFailure};
use crate::workspace::find_workspace_context;

/// Default per-request budget.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect budget for a fresh bus context.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Stable context key over the auth tuple.
pub fn context_key(globals: &AuthGlobals) -> String {
    let mut hasher = Sha256::new();
    for field in [
        &globals.profile,
        &globals.api,
        &globals.account_id,
        &globals.api_key,
        &globals.cookie,
        &globals.bearer,
        &globals.hub_password,
    ] {
        hasher.update(field.as_deref().unwrap_or(""));
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The bus method name for a file action.
pub fn method_name(action: Action) -> Option<&'static str> {
    match action {
        Action::FileList => Some("list"),
        Action::FileCat => Some("cat"),
        Action::FilePut => Some("put"),
        Action::FileGet => Some("get"),
        Action::FileRm => Some("rm"),
        Action::FileMkdir => Some("mkdir"),
        Action::FileRg => Some("rg"),
        Action::FileFd => Some("fd"),
        Action::Ping | Action::Shutdown => None,
    }
}

pub struct BusFileOps {
    contexts: tokio::sync::Mutex<HashMap<String, Arc<BusClient>>>,
    rpc_timeout: Duration,
}

impl BusFileOps {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self { contexts: tokio::sync::Mutex::new(HashMap::new()), rpc_timeout }
    }

    /// One shared client per auth tuple; built on first use.
    async fn client(&self, globals: &AuthGlobals) -> Result<Arc<BusClient>, OpFailure> {
        let key = context_key(globals);
        let mut contexts = self.contexts.lock().await;
        if let Some(client) = contexts.get(&key) {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            contexts.remove(&key);
        }

        let api = globals
            .api
            .clone()
            .ok_or_else(|| OpFailure::with_code("no api url configured", "config.no-api"))?;
        let config = ClientConfig {
            url: api,
            bearer: globals.bearer.clone().or_else(|| globals.api_key.clone()),
            system_cookie: globals.hub_password.clone(),
            connect_timeout: Some(CONNECT_TIMEOUT),
            ..Default::default()
        };
        let client = BusClient::connect(config).await.map_err(|e| classify(&e))?;
        debug!(key = %&key[..12], "opened bus context");
        let client = Arc::new(client);
        contexts.insert(key, Arc::clone(&client));
        Ok(client)
    }

    fn workspace_id(request: &Request) -> Result<Uuid, OpFailure> {
        if let Some(payload) = &request.payload {
            if let Some(raw) = payload.get("workspace_id").and_then(|v| v.as_str()) {
                return Uuid::parse_str(raw).map_err(|_| {
                    OpFailure::with_code(
                        format!("invalid workspace id {raw:?}"),
                        "workspace.invalid-id",
                    )
                });
            }
        }
        let cwd = request
            .cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| "/".into()));
        find_workspace_context(&cwd)
            .map(|context| context.workspace_id)
            .map_err(|e| OpFailure::with_code(e.to_string(), "workspace.not-found"))
    }
}

#[async_trait]
impl ActionExecutor for BusFileOps {
    async fn execute(&self, request: &Request) -> Result<serde_json::Value, OpFailure> {
        let Some(method) = method_name(request.action) else {
            return Err(OpFailure::new(format!(
                "action {:?} is not executable",
                request.action.as_str()
            )));
        };
        let globals = request.globals.clone().unwrap_or_default();
        let workspace_id = Self::workspace_id(request)?;
        let client = self.client(&globals).await?;

        let subject = format!("project.{workspace_id}.fs");
        let args = request.payload.clone().unwrap_or(serde_json::Value::Null);
        RpcService::call(&client, &subject, method, args, self.rpc_timeout)
            .await
            .map_err(|e| classify(&e))
    }
}

/// Map bus errors onto stable daemon codes.
fn classify(error: &BusError) -> OpFailure {
    let code = match error {
        BusError::Auth(_) => "auth.denied",
        BusError::Denied(_) => "auth.forbidden",
        BusError::Timeout(_) => "transport.timeout",
        BusError::Transport(_) | BusError::Closed => "transport.unavailable",
        BusError::MissedStream { .. } | BusError::Protocol(_) => "protocol.error",
        BusError::Rpc(_) => "rpc.failed",
    };
    OpFailure::with_code(error.to_string(), code)
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
