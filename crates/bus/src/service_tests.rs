// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::BusError;
use crate::server::tests::{hub_client, start_harness};

fn echo_service() -> RpcService {
    RpcService::new()
        .method("echo", |args| Box::pin(async move { Ok(serde_json::json!({"echo": args})) }))
        .method("fail", |_args| {
            Box::pin(async move { Err("deliberate failure".to_string()) })
        })
}

#[tokio::test]
async fn dispatches_known_methods() {
    let harness = start_harness().await;
    let server_client = Arc::new(hub_client(&harness).await);
    let caller = hub_client(&harness).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::new(echo_service()).serve(
        Arc::clone(&server_client),
        "hub.api.control",
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = RpcService::call(
        &caller,
        "hub.api.control",
        "echo",
        serde_json::json!({"x": 1}),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert_eq!(result, serde_json::json!({"echo": {"x": 1}}));
    shutdown.cancel();
}

#[tokio::test]
async fn handler_errors_become_rpc_errors() {
    let harness = start_harness().await;
    let server_client = Arc::new(hub_client(&harness).await);
    let caller = hub_client(&harness).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::new(echo_service()).serve(
        Arc::clone(&server_client),
        "hub.api.control",
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = RpcService::call(
        &caller,
        "hub.api.control",
        "fail",
        serde_json::Value::Null,
        Duration::from_secs(2),
    )
    .await;
    match result {
        Err(BusError::Rpc(message)) => assert_eq!(message, "deliberate failure"),
        other => panic!("expected rpc error, got {other:?}"),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let harness = start_harness().await;
    let server_client = Arc::new(hub_client(&harness).await);
    let caller = hub_client(&harness).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::new(echo_service()).serve(
        Arc::clone(&server_client),
        "hub.api.control",
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = RpcService::call(
        &caller,
        "hub.api.control",
        "drop_all_tables",
        serde_json::Value::Null,
        Duration::from_secs(2),
    )
    .await;
    match result {
        Err(BusError::Rpc(message)) => assert!(message.contains("unknown method"), "{message}"),
        other => panic!("expected rpc error, got {other:?}"),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn handle_without_transport() {
    let service = echo_service();
    let ok = service
        .handle(RpcRequest { name: "echo".into(), args: serde_json::json!(1) })
        .await;
    assert_eq!(ok.unwrap(), serde_json::json!({"echo": 1}));

    let err = service
        .handle(RpcRequest { name: "nope".into(), args: serde_json::Value::Null })
        .await;
    assert!(err.unwrap_err().contains("unknown method"));
}
