//! Workspace-level integration specs.
//!
//! Each module drives several crates together over real listeners:
//! the proxy's token→cookie upgrade and revocation kick, the bus with
//! routed identities, and the control service's LRO protocol.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/support.rs"]
mod support;

#[path = "specs/bus.rs"]
mod bus;
#[path = "specs/lro.rs"]
mod lro;
#[path = "specs/proxy.rs"]
mod proxy;
#[path = "specs/wire.rs"]
mod wire;
