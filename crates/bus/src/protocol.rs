// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus frames, carried as websocket text messages.

use serde::{Deserialize, Serialize};

use ph_core::AuthId;

/// Frames the client sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe `sid` to a subject pattern.
    Sub { sid: u64, pattern: String },
    Unsub { sid: u64 },
    /// Publish. `reply` must carry the sender's inbox prefix. `seq` numbers
    /// chunks of a streamed response; an empty-payload chunk terminates the
    /// stream.
    Pub {
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Ping,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after successful sign-in.
    Welcome { identity: AuthId, inbox_prefix: String },
    /// A message delivered to subscription `sid`.
    Msg {
        sid: u64,
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Pong,
    /// Typed error. Auth errors are followed by a close.
    Err { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Sign-in failed; the connection is closed.
    Auth,
    /// The ACL denied a publish or subscribe.
    Permission,
    /// Malformed frame or invalid subject.
    BadFrame,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Auth => "auth",
            ErrorCode::Permission => "permission",
            ErrorCode::BadFrame => "bad_frame",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
