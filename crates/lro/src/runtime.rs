// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory LRO registry for the host side.
//!
//! `submit` spawns the operation's task; `cancel` is cooperative through a
//! `CancellationToken`. A cancel racing a success is resolved by whichever
//! terminal state commits first; later commits are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ph_core::{Clock, OpId};

use crate::types::{OpScope, OpStatus, OpSummary};

/// The work an operation performs. Receives the cancellation token so long
/// phases can bail early; the runtime also races the whole future against
/// the token.
pub type OpHandler =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send>;

/// Optional submission metadata.
#[derive(Debug, Default, Clone)]
pub struct SubmitOpts {
    pub created_by: Option<Uuid>,
    pub owner_type: Option<String>,
    pub owner_id: Option<String>,
    pub expires_at: Option<u64>,
}

struct Entry {
    summary: OpSummary,
    cancel: CancellationToken,
}

pub struct LroRuntime<C: Clock> {
    ops: Arc<Mutex<HashMap<OpId, Entry>>>,
    clock: C,
}

impl<C: Clock> Clone for LroRuntime<C> {
    fn clone(&self) -> Self {
        Self { ops: Arc::clone(&self.ops), clock: self.clock.clone() }
    }
}

impl<C: Clock> LroRuntime<C> {
    pub fn new(clock: C) -> Self {
        Self { ops: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Register and start an operation.
    pub fn submit(
        &self,
        kind: impl Into<String>,
        scope: OpScope,
        input: serde_json::Value,
        opts: SubmitOpts,
        handler: OpHandler,
    ) -> OpId {
        let op_id = OpId::new();
        let now = self.clock.epoch_ms();
        let cancel = CancellationToken::new();
        let summary = OpSummary {
            op_id: op_id.clone(),
            kind: kind.into(),
            scope,
            status: OpStatus::Queued,
            error: None,
            attempt: 1,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            expires_at: opts.expires_at,
            dismissed_at: None,
            input,
            result: None,
            progress_summary: None,
            created_by: opts.created_by,
            owner_type: opts.owner_type,
            owner_id: opts.owner_id,
        };
        self.ops.lock().insert(op_id.clone(), Entry { summary, cancel: cancel.clone() });
        self.spawn_run(op_id.clone(), cancel, handler);
        op_id
    }

    /// Re-queue a terminal operation with a fresh attempt counter. The only
    /// path that increments `attempt`.
    pub fn restart(&self, op_id: &OpId, handler: OpHandler) -> bool {
        let cancel = CancellationToken::new();
        {
            let mut ops = self.ops.lock();
            let Some(entry) = ops.get_mut(op_id) else { return false };
            if !entry.summary.status.is_terminal() {
                return false;
            }
            entry.summary.attempt += 1;
            entry.summary.status = OpStatus::Queued;
            entry.summary.error = None;
            entry.summary.result = None;
            entry.summary.started_at = None;
            entry.summary.finished_at = None;
            touch(&mut entry.summary, self.clock.epoch_ms());
            entry.cancel = cancel.clone();
        }
        self.spawn_run(op_id.clone(), cancel, handler);
        true
    }

    /// Current summary, applying lazy expiry.
    pub fn get(&self, op_id: &OpId) -> Option<OpSummary> {
        let now = self.clock.epoch_ms();
        let mut ops = self.ops.lock();
        let entry = ops.get_mut(op_id)?;
        expire_if_due(entry, now);
        Some(entry.summary.clone())
    }

    /// Request cooperative cancellation. Returns false for unknown or
    /// already-terminal operations.
    pub fn cancel(&self, op_id: &OpId) -> bool {
        let mut ops = self.ops.lock();
        let Some(entry) = ops.get_mut(op_id) else { return false };
        if entry.summary.status.is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        true
    }

    /// Operations in a scope, oldest first. Terminal operations are
    /// excluded unless `include_completed`.
    pub fn list(&self, scope: Option<OpScope>, include_completed: bool) -> Vec<OpSummary> {
        let now = self.clock.epoch_ms();
        let mut ops = self.ops.lock();
        let mut out: Vec<OpSummary> = ops
            .values_mut()
            .map(|entry| {
                expire_if_due(entry, now);
                &entry.summary
            })
            .filter(|s| scope.map(|wanted| s.scope == wanted).unwrap_or(true))
            .filter(|s| include_completed || !s.status.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    pub fn update_progress(&self, op_id: &OpId, progress: impl Into<String>) {
        let now = self.clock.epoch_ms();
        if let Some(entry) = self.ops.lock().get_mut(op_id) {
            entry.summary.progress_summary = Some(progress.into());
            touch(&mut entry.summary, now);
        }
    }

    pub fn dismiss(&self, op_id: &OpId) -> bool {
        let now = self.clock.epoch_ms();
        let mut ops = self.ops.lock();
        let Some(entry) = ops.get_mut(op_id) else { return false };
        entry.summary.dismissed_at = Some(now);
        touch(&mut entry.summary, now);
        true
    }

    fn spawn_run(&self, op_id: OpId, cancel: CancellationToken, handler: OpHandler) {
        let ops = Arc::clone(&self.ops);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            // Mark running unless a cancel won the race before start.
            {
                let mut guard = ops.lock();
                let Some(entry) = guard.get_mut(&op_id) else { return };
                if cancel.is_cancelled() {
                    commit(entry, OpStatus::Canceled, None, None, clock.epoch_ms());
                    return;
                }
                let now = clock.epoch_ms();
                entry.summary.status = OpStatus::Running;
                entry.summary.started_at = Some(now);
                touch(&mut entry.summary, now);
            }

            let outcome = tokio::select! {
                result = handler(cancel.clone()) => Some(result),
                _ = cancel.cancelled() => None,
            };

            let mut guard = ops.lock();
            let Some(entry) = guard.get_mut(&op_id) else { return };
            let now = clock.epoch_ms();
            match outcome {
                Some(Ok(result)) => commit(entry, OpStatus::Succeeded, Some(result), None, now),
                Some(Err(error)) => commit(entry, OpStatus::Failed, None, Some(error), now),
                None => commit(entry, OpStatus::Canceled, None, None, now),
            }
        });
    }
}

/// Commit a terminal state; no-op if a terminal state was committed first.
fn commit(
    entry: &mut Entry,
    status: OpStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
    now: u64,
) {
    if entry.summary.status.is_terminal() {
        return;
    }
    entry.summary.status = status;
    entry.summary.result = result;
    entry.summary.error = error;
    entry.summary.finished_at = Some(now);
    touch(&mut entry.summary, now);
    tracing::debug!(op_id = %entry.summary.op_id, %status, "operation finished");
}

fn expire_if_due(entry: &mut Entry, now: u64) {
    if entry.summary.status.is_terminal() {
        return;
    }
    if let Some(expires_at) = entry.summary.expires_at {
        if now > expires_at {
            entry.cancel.cancel();
            commit(entry, OpStatus::Expired, None, None, now);
        }
    }
}

/// `updated_at` never decreases.
fn touch(summary: &mut OpSummary, now: u64) {
    summary.updated_at = summary.updated_at.max(now);
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
