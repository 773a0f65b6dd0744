// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project host daemon library.
//!
//! Subsystems: the authenticating HTTP/WS reverse proxy, the reverse-SSH
//! tunnel supervisor, the codex credential cache, and the master
//! registration loop. Each runs as an independent task wired together by
//! `lifecycle`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod creds;
pub mod device_auth;
pub mod env;
pub mod leases;
pub mod lifecycle;
pub mod master;
pub mod proxy;
pub mod tunnel;
