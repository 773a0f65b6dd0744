// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use uuid::Uuid;

#[test]
fn client_frames_round_trip() {
    let frames = vec![
        ClientFrame::Sub { sid: 1, pattern: "project.x.>".into() },
        ClientFrame::Unsub { sid: 1 },
        ClientFrame::Pub {
            subject: "hub.api".into(),
            reply: Some("_INBOX.hub.r1".into()),
            payload: serde_json::json!({"name": "register"}),
            seq: None,
        },
        ClientFrame::Ping,
    ];
    for frame in frames {
        let json = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}

#[test]
fn server_frames_round_trip() {
    let frames = vec![
        ServerFrame::Welcome {
            identity: AuthId::Account(Uuid::new_v4()),
            inbox_prefix: "_INBOX.account-x".into(),
        },
        ServerFrame::Msg {
            sid: 2,
            subject: "heartbeats.h".into(),
            reply: None,
            payload: serde_json::Value::Null,
            seq: Some(3),
        },
        ServerFrame::Pong,
        ServerFrame::Err { code: ErrorCode::Permission, message: "denied".into() },
    ];
    for frame in frames {
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}

#[test]
fn frame_tags_are_snake_case() {
    let json = serde_json::to_string(&ClientFrame::Sub { sid: 0, pattern: "a".into() }).unwrap();
    assert!(json.contains(r#""type":"sub""#), "{json}");
    let json =
        serde_json::to_string(&ServerFrame::Err { code: ErrorCode::Auth, message: "x".into() })
            .unwrap();
    assert!(json.contains(r#""code":"auth""#), "{json}");
}
