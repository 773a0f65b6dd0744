// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-request authorization: session cookie, else bearer token from
//! header, cookie, or query parameter; then the revocation and
//! collaborator gates.

use std::sync::Arc;

use uuid::Uuid;

use ph_auth::{get_cookie, KeyStore, SessionKey, AUTH_QUERY_PARAM};
use ph_core::Clock;
use ph_store::Db;

/// A request that passed all gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorized {
    pub account_id: Uuid,
    pub iat_secs: u64,
    /// A bearer token was freshly verified: issue a session cookie.
    pub fresh_bearer: bool,
    /// The bearer came from the query parameter (strip/redirect).
    pub from_query: bool,
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// 401. `clear_cookie` when a revoked/invalid session cookie should be
    /// dropped by the browser.
    Unauthorized { clear_cookie: bool },
    /// 403: authenticated but not a collaborator.
    Forbidden,
}

/// Everything the authorizer consults.
pub struct AuthGates<C: Clock> {
    pub host_id: Uuid,
    pub session_key: SessionKey,
    /// Session cookie name for this host's base path
    /// (`ph_auth::session_cookie_name`).
    pub session_cookie: String,
    pub keys: Arc<KeyStore>,
    pub db: Arc<Db>,
    pub clock: C,
}

impl<C: Clock> AuthGates<C> {
    /// Run the per-request protocol for `project_id`.
    pub fn authorize(
        &self,
        cookie_header: Option<&str>,
        authorization: Option<&str>,
        query: Option<&str>,
        project_id: Uuid,
    ) -> Result<Authorized, Denial> {
        // 1. A valid session cookie short-circuits token handling.
        if let Some(session) = cookie_header
            .and_then(|h| get_cookie(h, &self.session_cookie))
            .and_then(|token| self.session_key.verify(token, &self.clock))
        {
            self.revocation_gate(session.account_id, session.iat, true)?;
            self.collaborator_gate(session.account_id, project_id)?;
            return Ok(Authorized {
                account_id: session.account_id,
                iat_secs: session.iat,
                fresh_bearer: false,
                from_query: false,
            });
        }

        // 2. Bearer: Authorization header, canonical cookie, query param —
        // in that order.
        let header_bearer = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        let cookie_bearer = || {
            cookie_header.and_then(|h| get_cookie(h, AUTH_QUERY_PARAM)).map(String::from)
        };
        let query_bearer =
            || query.and_then(|q| ph_bus::auth::query_param(q, AUTH_QUERY_PARAM));

        let (token, from_query) = match header_bearer.or_else(cookie_bearer) {
            Some(token) => (token, false),
            None => match query_bearer() {
                Some(token) => (token, true),
                None => return Err(Denial::Unauthorized { clear_cookie: false }),
            },
        };

        // 3. Verify.
        let claims = self
            .keys
            .verify(&token, self.host_id, &self.clock)
            .map_err(|_| Denial::Unauthorized { clear_cookie: false })?;
        let account_id = claims
            .account_id()
            .map_err(|_| Denial::Unauthorized { clear_cookie: false })?;

        // 4 + 5. Revocation, then membership.
        self.revocation_gate(account_id, claims.iat, false)?;
        self.collaborator_gate(account_id, project_id)?;

        Ok(Authorized { account_id, iat_secs: claims.iat, fresh_bearer: true, from_query })
    }

    /// Reject sessions/tokens issued at or before the account's revocation
    /// watermark.
    pub fn is_revoked(&self, account_id: Uuid, iat_secs: u64) -> bool {
        match self.db.revocation(account_id) {
            Ok(Some(revocation)) => revocation.revokes(iat_secs),
            Ok(None) => false,
            // A broken store fails closed.
            Err(_) => true,
        }
    }

    fn revocation_gate(
        &self,
        account_id: Uuid,
        iat_secs: u64,
        had_session_cookie: bool,
    ) -> Result<(), Denial> {
        if self.is_revoked(account_id, iat_secs) {
            return Err(Denial::Unauthorized { clear_cookie: had_session_cookie });
        }
        Ok(())
    }

    fn collaborator_gate(&self, account_id: Uuid, project_id: Uuid) -> Result<(), Denial> {
        let visible = self
            .db
            .project(project_id)
            .ok()
            .flatten()
            .map(|row| row.visible_to(account_id))
            .unwrap_or(false);
        if visible {
            Ok(())
        } else {
            Err(Denial::Forbidden)
        }
    }
}

#[cfg(test)]
#[path = "authorize_tests.rs"]
mod tests;
