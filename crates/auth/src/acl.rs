// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subject-level authorization predicate for the bus.
//!
//! Decision order: common allowlist (heartbeats, inbox subjects), cached
//! decision, then per-identity scope rules. Collaborator membership comes
//! from a [`CollaboratorSource`] so the store and tests can plug in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use ph_core::subject::{inbox_owner, is_heartbeat, scope_of, SubjectScope};
use ph_core::{AuthId, Clock, TtlCache};

/// What the caller is about to do with the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Pub,
    Sub,
    Req,
}

/// Source of collaborator membership: is `account_id` an owner or
/// collaborator on `project_id`?
#[async_trait]
pub trait CollaboratorSource: Send + Sync {
    async fn is_collaborator(&self, account_id: Uuid, project_id: Uuid) -> bool;
}

/// In-memory membership set for tests and bootstrap.
#[derive(Default)]
pub struct StaticCollaborators {
    members: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl StaticCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, account_id: Uuid, project_id: Uuid) {
        self.members.lock().insert((account_id, project_id));
    }

    pub fn remove(&self, account_id: Uuid, project_id: Uuid) {
        self.members.lock().remove(&(account_id, project_id));
    }
}

#[async_trait]
impl CollaboratorSource for StaticCollaborators {
    async fn is_collaborator(&self, account_id: Uuid, project_id: Uuid) -> bool {
        self.members.lock().contains(&(account_id, project_id))
    }
}

const COLLAB_TTL: Duration = Duration::from_secs(30);
const COLLAB_CAPACITY: usize = 50_000;
const DECISION_TTL: Duration = Duration::from_secs(60);
const DECISION_CAPACITY: usize = 20_000;

/// The ACL predicate with its two caches.
pub struct Authorizer<C: Clock> {
    source: Arc<dyn CollaboratorSource>,
    collaborators: TtlCache<(Uuid, Uuid), bool, C>,
    decisions: TtlCache<(AuthId, OpKind, String), bool, C>,
}

impl<C: Clock> Authorizer<C> {
    pub fn new(source: Arc<dyn CollaboratorSource>, clock: C) -> Self {
        Self {
            source,
            collaborators: TtlCache::new(COLLAB_CAPACITY, COLLAB_TTL, clock.clone()),
            decisions: TtlCache::new(DECISION_CAPACITY, DECISION_TTL, clock),
        }
    }

    /// Allow or deny `user` performing `op` on `subject`.
    pub async fn allow(&self, user: AuthId, op: OpKind, subject: &str) -> bool {
        // Common allowlist precedes scope rules.
        if is_heartbeat(subject) {
            return true;
        }
        if let Some(owner) = inbox_owner(subject) {
            return match op {
                // Only the owner may listen on its inbox; anyone
                // authenticated may publish a reply into one.
                OpKind::Sub => owner == user.to_string(),
                OpKind::Pub | OpKind::Req => true,
            };
        }

        let key = (user, op, subject.to_string());
        if let Some(cached) = self.decisions.get(&key) {
            return cached;
        }

        let allowed = match user {
            AuthId::Hub => true,
            AuthId::Project(project_id) => {
                matches!(scope_of(subject), SubjectScope::Project(p) if p == project_id)
            }
            AuthId::Account(account_id) => match scope_of(subject) {
                SubjectScope::Account(a) => a == account_id,
                SubjectScope::Project(p) => self.is_collaborator_cached(account_id, p).await,
                _ => false,
            },
        };
        self.decisions.insert(key, allowed);
        allowed
    }

    /// Flush both caches together.
    pub fn flush(&self) {
        self.collaborators.clear();
        self.decisions.clear();
    }

    async fn is_collaborator_cached(&self, account_id: Uuid, project_id: Uuid) -> bool {
        // Project-identity self-access: the account whose id equals the
        // project id always passes.
        if account_id == project_id {
            return true;
        }
        let key = (account_id, project_id);
        if let Some(cached) = self.collaborators.get(&key) {
            return cached;
        }
        let member = self.source.is_collaborator(account_id, project_id).await;
        self.collaborators.insert(key, member);
        member
    }
}

#[cfg(test)]
#[path = "acl_tests.rs"]
mod tests;
