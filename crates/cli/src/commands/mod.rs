// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations.

pub mod auth;
pub mod daemon;
pub mod file;
pub mod op;
pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use ph_wire::{Action, AuthGlobals, Request, Response};

use crate::client::DaemonClient;
use crate::daemon::ops::BusFileOps;
use crate::daemon::ActionExecutor;
use crate::exit_error::ExitError;
use crate::output::OutputFormat;

/// Everything a command needs.
pub struct Ctx {
    pub format: OutputFormat,
    pub globals: AuthGlobals,
    pub client: DaemonClient,
    pub rpc_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub no_daemon: bool,
}

static NEXT_REQUEST_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl Ctx {
    /// Build a request carrying the invocation's cwd and globals.
    pub fn request(&self, action: Action, payload: Option<serde_json::Value>) -> Request {
        Request {
            id: NEXT_REQUEST_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            action,
            cwd: std::env::current_dir().ok(),
            globals: Some(self.globals.clone()),
            payload,
        }
    }

    /// Run a file action: through the daemon normally, in-process with
    /// `--no-daemon`.
    pub async fn run_action(
        &self,
        action: Action,
        payload: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ExitError> {
        let request = self.request(action, payload);
        if self.no_daemon {
            let ops: Arc<dyn ActionExecutor> = Arc::new(BusFileOps::new(self.rpc_timeout));
            return ops
                .execute(&request)
                .await
                .map_err(|failure| ExitError::failure(failure.message));
        }
        let response = self
            .client
            .request(&request)
            .await
            .map_err(|e| ExitError::failure(e.to_string()))?;
        unwrap_response(response)
    }
}

/// Turn a daemon response into data or a failure message.
pub fn unwrap_response(response: Response) -> Result<serde_json::Value, ExitError> {
    if response.ok {
        Ok(response.data.unwrap_or(serde_json::Value::Null))
    } else {
        let message = response.error.unwrap_or_else(|| "unknown daemon error".to_string());
        match response.meta.and_then(|m| m.code) {
            Some(code) => Err(ExitError::failure(format!("{message} ({code})"))),
            None => Err(ExitError::failure(message)),
        }
    }
}
