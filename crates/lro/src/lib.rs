// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-running operations: submit → poll → terminal, with cooperative
//! cancellation. The host keeps summaries in memory only; durable LRO
//! state belongs to the master.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod runtime;
mod types;
mod wait;

pub use runtime::{LroRuntime, OpHandler, SubmitOpts};
pub use types::{OpScope, OpStatus, OpSummary, ScopeType};
pub use wait::{wait, WaitOutcome};
