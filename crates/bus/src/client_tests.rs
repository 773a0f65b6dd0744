// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

use uuid::Uuid;

use crate::server::tests::{account_token, hub_client, start_harness};

#[test]
fn ws_url_conversion() {
    assert_eq!(ws_url("http://localhost:9100/"), "ws://localhost:9100");
    assert_eq!(ws_url("https://h.example"), "wss://h.example");
    assert_eq!(ws_url("ws://already"), "ws://already");
    assert_eq!(ws_url("localhost:9100"), "ws://localhost:9100");
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let harness = start_harness().await;
    let client = hub_client(&harness).await;
    let result = client
        .request("hub.nobody.home", serde_json::Value::Null, Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(BusError::Timeout(_))), "{result:?}");
}

#[tokio::test]
async fn request_reply_between_clients() {
    let harness = start_harness().await;
    let responder = hub_client(&harness).await;
    let caller = hub_client(&harness).await;

    let mut sub = responder.subscribe("hub.echo").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let responder_task = tokio::spawn(async move {
        let msg = sub.next().await.unwrap();
        let reply = msg.reply.clone().unwrap();
        responder.publish(reply, serde_json::json!({"echo": msg.payload})).unwrap();
    });

    let result = caller
        .request("hub.echo", serde_json::json!("hello"), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!({"echo": "hello"}));
    responder_task.await.unwrap();
}

#[tokio::test]
async fn stream_delivers_ordered_chunks_until_null_terminator() {
    let harness = start_harness().await;
    let responder = hub_client(&harness).await;
    let caller = hub_client(&harness).await;

    let mut sub = responder.subscribe("hub.stream").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::spawn(async move {
        let msg = sub.next().await.unwrap();
        let reply = msg.reply.clone().unwrap();
        for seq in 0..3u64 {
            responder
                .publish_with_seq(reply.clone(), serde_json::json!({"chunk": seq}), Some(seq))
                .unwrap();
        }
        responder
            .publish_with_seq(reply, serde_json::Value::Null, Some(3))
            .unwrap();
    });

    let mut rx = caller
        .request_stream("hub.stream", serde_json::Value::Null, Duration::from_secs(2))
        .await
        .unwrap();
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk.unwrap());
    }
    assert_eq!(
        chunks,
        vec![
            serde_json::json!({"chunk": 0}),
            serde_json::json!({"chunk": 1}),
            serde_json::json!({"chunk": 2}),
        ]
    );
}

#[tokio::test]
async fn stream_gap_is_missed_stream_error() {
    let harness = start_harness().await;
    let responder = hub_client(&harness).await;
    let caller = hub_client(&harness).await;

    let mut sub = responder.subscribe("hub.gappy").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::spawn(async move {
        let msg = sub.next().await.unwrap();
        let reply = msg.reply.clone().unwrap();
        for seq in [0u64, 2] {
            responder
                .publish_with_seq(reply.clone(), serde_json::json!({"chunk": seq}), Some(seq))
                .unwrap();
        }
    });

    let mut rx = caller
        .request_stream("hub.gappy", serde_json::Value::Null, Duration::from_secs(2))
        .await
        .unwrap();
    let first = rx.recv().await.unwrap().unwrap();
    assert_eq!(first, serde_json::json!({"chunk": 0}));
    let second = rx.recv().await.unwrap();
    assert!(
        matches!(second, Err(BusError::MissedStream { expected: 1, got: 2 })),
        "{second:?}"
    );
}

#[tokio::test]
async fn denied_publish_surfaces_fast_on_request() {
    let harness = start_harness().await;
    let account_id = Uuid::new_v4();
    let client = BusClient::connect(ClientConfig {
        url: harness.url.clone(),
        bearer: Some(account_token(&harness, account_id, Uuid::new_v4())),
        ..Default::default()
    })
    .await
    .unwrap();

    let started = std::time::Instant::now();
    let result = client
        .request("hub.api", serde_json::Value::Null, Duration::from_secs(10))
        .await;
    assert!(matches!(result, Err(BusError::Denied(_))), "{result:?}");
    // Fails via the error frame, not the 10s budget.
    assert!(started.elapsed() < Duration::from_secs(5));
}
