// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reference-counted container leases.
//!
//! Every operation touching a project's container holds a lease; the
//! container starts when the first lease for a project is taken and is
//! torn down `ttl` after the count returns to zero. A fresh lease inside
//! the grace window bumps the generation, which disarms the pending
//! disposer, so disposers are serialized per key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{AdapterError, ContainerRuntime};

/// Default grace period after the refcount reaches zero.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

struct Entry {
    refs: usize,
    /// Bumped on every acquire; a disposer only fires if the generation it
    /// captured is still current.
    generation: u64,
}

struct Shared {
    containers: Arc<dyn ContainerRuntime>,
    entries: Mutex<HashMap<Uuid, Entry>>,
    ttl: Duration,
}

/// Lease registry for one host.
#[derive(Clone)]
pub struct ContainerLeases {
    shared: Arc<Shared>,
}

impl ContainerLeases {
    pub fn new(containers: Arc<dyn ContainerRuntime>, ttl: Duration) -> Self {
        Self { shared: Arc::new(Shared { containers, entries: Mutex::new(HashMap::new()), ttl }) }
    }

    /// Take a lease on `project_id`, starting its container on the 0→1
    /// transition. The container stays up while any guard is alive.
    pub async fn acquire(&self, project_id: Uuid) -> Result<LeaseGuard, AdapterError> {
        let first = {
            let mut entries = self.shared.entries.lock();
            let entry = entries.entry(project_id).or_insert(Entry { refs: 0, generation: 0 });
            entry.refs += 1;
            entry.generation += 1;
            entry.refs == 1
        };
        if first {
            if let Err(e) = self.shared.containers.start_project(project_id).await {
                self.release_inner(project_id);
                return Err(e);
            }
            debug!(%project_id, "container leased up");
        }
        Ok(LeaseGuard { shared: Arc::clone(&self.shared), project_id })
    }

    pub fn active_leases(&self, project_id: Uuid) -> usize {
        self.shared.entries.lock().get(&project_id).map(|e| e.refs).unwrap_or(0)
    }

    fn release_inner(&self, project_id: Uuid) {
        release(&self.shared, project_id);
    }
}

/// One held lease. Dropping it schedules teardown once the project's count
/// reaches zero.
pub struct LeaseGuard {
    shared: Arc<Shared>,
    project_id: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        release(&self.shared, self.project_id);
    }
}

fn release(shared: &Arc<Shared>, project_id: Uuid) {
    let armed_generation = {
        let mut entries = shared.entries.lock();
        let Some(entry) = entries.get_mut(&project_id) else { return };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        entry.generation
    };

    // Last lease gone: arm the disposer for this generation. Guards are
    // dropped from async contexts; without a runtime there is nothing to
    // defer on and the container is left for the next startup to reconcile.
    let Ok(handle) = tokio::runtime::Handle::try_current() else { return };
    let shared = Arc::clone(shared);
    handle.spawn(async move {
        tokio::time::sleep(shared.ttl).await;
        let due = {
            let mut entries = shared.entries.lock();
            match entries.get(&project_id) {
                Some(entry) if entry.refs == 0 && entry.generation == armed_generation => {
                    entries.remove(&project_id);
                    true
                }
                // Re-acquired (or a newer disposer armed) meanwhile.
                _ => false,
            }
        };
        if due {
            debug!(%project_id, "lease ttl elapsed, stopping container");
            if let Err(e) = shared.containers.stop_project(project_id).await {
                warn!(%e, %project_id, "container teardown failed");
            }
        }
    });
}

#[cfg(test)]
#[path = "leases_tests.rs"]
mod tests;
