// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction so token expiry, revocation and TTL logic are testable.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock providing monotonic and wall time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;

    /// Wall time in whole seconds, the unit token `iat`/`exp` claims use.
    fn epoch_secs(&self) -> u64 {
        self.epoch_ms() / 1000
    }
}

/// Real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

#[derive(Debug)]
struct FakeState {
    now: Instant,
    epoch_ms: u64,
}

/// Controllable clock for tests. Clones share the same underlying time.
#[derive(Clone)]
pub struct FakeClock {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClock {
    /// Start at an arbitrary fixed epoch (1970-01-12ish) so tests get
    /// deterministic `iat` values.
    pub fn new() -> Self {
        Self::at_epoch_ms(1_000_000_000)
    }

    pub fn at_epoch_ms(epoch_ms: u64) -> Self {
        Self { state: Arc::new(Mutex::new(FakeState { now: Instant::now(), epoch_ms })) }
    }

    /// Advance both monotonic and wall time.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += by;
        state.epoch_ms += by.as_millis() as u64;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    pub fn set_epoch_ms(&self, epoch_ms: u64) {
        self.state.lock().epoch_ms = epoch_ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn epoch_ms(&self) -> u64 {
        self.state.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
