// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side polling loop for long operations.

use std::future::Future;
use std::time::Duration;

use crate::types::{OpStatus, OpSummary};

/// Result of [`wait`]: the last observed status and whether the budget ran
/// out first.
#[derive(Debug, Clone)]
pub struct WaitOutcome {
    pub status: OpStatus,
    pub timed_out: bool,
    pub summary: OpSummary,
}

/// Poll `fetch` every `poll_interval` until the operation reaches a
/// terminal status or `timeout` elapses.
///
/// The most recent observation wins, but an observation whose `updated_at`
/// went backwards (stale reader) is ignored in favor of the newer one.
/// Returns within `timeout + poll_interval`.
pub async fn wait<F, Fut, E>(
    mut fetch: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<WaitOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OpSummary, E>>,
{
    let started = tokio::time::Instant::now();
    let mut last: Option<OpSummary> = None;
    loop {
        let observed = fetch().await?;
        let newest = match last.take() {
            Some(prev) if prev.updated_at > observed.updated_at => prev,
            _ => observed,
        };
        if newest.status.is_terminal() {
            return Ok(WaitOutcome { status: newest.status, timed_out: false, summary: newest });
        }
        if started.elapsed() >= timeout {
            return Ok(WaitOutcome { status: newest.status, timed_out: true, summary: newest });
        }
        last = Some(newest);
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
#[path = "wait_tests.rs"]
mod tests;
