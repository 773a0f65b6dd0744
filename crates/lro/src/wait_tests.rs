// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ph_core::OpId;
use uuid::Uuid;

use crate::types::{OpScope, OpSummary};

fn summary(status: OpStatus, updated_at: u64) -> OpSummary {
    OpSummary {
        op_id: OpId::from_string("lro-wait"),
        kind: "demo".into(),
        scope: OpScope::project(Uuid::nil()),
        status,
        error: None,
        attempt: 1,
        created_at: 0,
        started_at: None,
        finished_at: None,
        updated_at,
        expires_at: None,
        dismissed_at: None,
        input: serde_json::Value::Null,
        result: None,
        progress_summary: None,
        created_by: None,
        owner_type: None,
        owner_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn returns_terminal_as_soon_as_observed() {
    let polls = Arc::new(AtomicU64::new(0));
    let polls_in = Arc::clone(&polls);

    let outcome = wait(
        move || {
            let n = polls_in.fetch_add(1, Ordering::SeqCst);
            async move {
                // queued → running → succeeded on the fourth poll (t=3.4s
                // with 1s polling against a 5s budget).
                let status = match n {
                    0 => OpStatus::Queued,
                    1..=2 => OpStatus::Running,
                    _ => OpStatus::Succeeded,
                };
                Ok::<_, Infallible>(summary(status, n))
            }
        },
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, OpStatus::Succeeded);
    assert!(!outcome.timed_out);
    assert_eq!(polls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn times_out_with_last_status() {
    let outcome = wait(
        || async { Ok::<_, Infallible>(summary(OpStatus::Running, 1)) },
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, OpStatus::Running);
    assert!(outcome.timed_out);
}

#[tokio::test(start_paused = true)]
async fn stale_observation_does_not_win() {
    let polls = Arc::new(AtomicU64::new(0));
    let polls_in = Arc::clone(&polls);

    let outcome = wait(
        move || {
            let n = polls_in.fetch_add(1, Ordering::SeqCst);
            async move {
                // A stale read reports an older updated_at with an older
                // progress state; the newer observation is kept.
                let s = match n {
                    0 => summary(OpStatus::Running, 10),
                    1 => summary(OpStatus::Queued, 3),
                    _ => summary(OpStatus::Succeeded, 20),
                };
                Ok::<_, Infallible>(s)
            }
        },
        Duration::from_secs(10),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, OpStatus::Succeeded);
    assert_eq!(outcome.summary.updated_at, 20);
}

#[tokio::test(start_paused = true)]
async fn canceled_is_terminal_for_wait() {
    let outcome = wait(
        || async { Ok::<_, Infallible>(summary(OpStatus::Canceled, 1)) },
        Duration::from_secs(5),
        Duration::from_millis(100),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status, OpStatus::Canceled);
    assert!(!outcome.timed_out);
}

#[tokio::test(start_paused = true)]
async fn fetch_errors_propagate() {
    let result = wait(
        || async { Err::<OpSummary, _>("connection refused".to_string()) },
        Duration::from_secs(1),
        Duration::from_millis(100),
    )
    .await;
    assert_eq!(result.unwrap_err(), "connection refused");
}
