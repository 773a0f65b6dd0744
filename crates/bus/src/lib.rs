// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The conat message bus: websocket server with per-connection identities,
//! ACL-gated routing, a request/reply client, routed per-project clients
//! with single-flight token issuance, and RPC service registries.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod client;
pub mod protocol;
pub mod routed;
pub mod server;
pub mod service;
pub mod transport;

pub use auth::{AuthMaterial, BusAuth, BusAuthError, ProjectSecretSource, StaticProjectSecrets};
pub use client::{BusClient, BusError, BusMsg, ClientConfig, Subscription};
pub use protocol::{ClientFrame, ErrorCode, ServerFrame};
pub use routed::{MintedToken, RoutedPool, TokenIssuer, TOKEN_REFRESH_LEEWAY_MS};
pub use server::BusServer;
pub use service::{RpcRequest, RpcService};
pub use transport::BusSocket;
