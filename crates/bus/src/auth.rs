// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection sign-in: turn presented credentials into an [`AuthId`].
//!
//! Three paths, tried in order: the system cookie (local conat password)
//! yields `hub`; a project secret + project id yields `project`; a bearer
//! token verified against the master's key yields `account`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use ph_auth::{KeyStore, TokenError};
use ph_core::{AuthId, Clock};

#[derive(Debug, Error, PartialEq)]
pub enum BusAuthError {
    #[error("no credentials presented")]
    MissingCredentials,

    #[error("bad system cookie")]
    BadSystemCookie,

    #[error("bad project secret")]
    BadProjectSecret,

    #[error("invalid bearer token: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Lookup of per-project secret tokens (the store implements this).
#[async_trait]
pub trait ProjectSecretSource: Send + Sync {
    /// The project's secret, or `None` for unknown projects.
    async fn project_secret(&self, project_id: Uuid) -> Option<String>;
}

/// In-memory secrets for tests.
#[derive(Default)]
pub struct StaticProjectSecrets {
    secrets: Mutex<std::collections::HashMap<Uuid, String>>,
}

impl StaticProjectSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, project_id: Uuid, secret: impl Into<String>) {
        self.secrets.lock().insert(project_id, secret.into());
    }
}

#[async_trait]
impl ProjectSecretSource for StaticProjectSecrets {
    async fn project_secret(&self, project_id: Uuid) -> Option<String> {
        self.secrets.lock().get(&project_id).cloned()
    }
}

/// Credentials extracted from the upgrade request (headers, cookies, or the
/// browser query-parameter fallback).
#[derive(Debug, Default, Clone)]
pub struct AuthMaterial {
    pub system_cookie: Option<String>,
    pub project_id: Option<Uuid>,
    pub project_secret: Option<String>,
    pub bearer: Option<String>,
}

impl AuthMaterial {
    /// Build from the parts of an upgrade request. The bearer token comes
    /// from `Authorization: Bearer` or, for cross-origin browser use, the
    /// auth query parameter.
    pub fn from_request_parts(
        authorization: Option<&str>,
        cookie_header: Option<&str>,
        query: Option<&str>,
    ) -> Self {
        let cookie = |name: &str| cookie_header.and_then(|h| ph_auth::get_cookie(h, name));
        let bearer = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or_else(|| query.and_then(|q| query_param(q, ph_auth::AUTH_QUERY_PARAM)));
        Self {
            system_cookie: cookie(ph_auth::SYSTEM_COOKIE).map(String::from),
            project_id: cookie(ph_auth::PROJECT_ID_COOKIE)
                .and_then(|v| Uuid::parse_str(v).ok()),
            project_secret: cookie(ph_auth::PROJECT_SECRET_COOKIE).map(String::from),
            bearer,
        }
    }
}

/// Value of `name` in a raw query string. Tokens are base64url, so no
/// percent-decoding is required.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

/// Everything sign-in needs, shared by the ws listener and the proxy.
pub struct BusAuth<C: Clock> {
    pub conat_password: String,
    pub host_id: Uuid,
    pub keys: Arc<KeyStore>,
    pub secrets: Arc<dyn ProjectSecretSource>,
    pub clock: C,
}

impl<C: Clock> BusAuth<C> {
    /// Authenticate one connection. Failures are typed; the caller closes
    /// the connection after reporting them.
    pub async fn sign_in(&self, material: &AuthMaterial) -> Result<AuthId, BusAuthError> {
        if let Some(cookie) = &material.system_cookie {
            if cookie == &self.conat_password {
                return Ok(AuthId::Hub);
            }
            return Err(BusAuthError::BadSystemCookie);
        }
        if let (Some(project_id), Some(secret)) =
            (material.project_id, &material.project_secret)
        {
            let expected = self.secrets.project_secret(project_id).await;
            return match expected {
                Some(expected) if &expected == secret => Ok(AuthId::Project(project_id)),
                _ => Err(BusAuthError::BadProjectSecret),
            };
        }
        if let Some(bearer) = &material.bearer {
            let claims = self.keys.verify(bearer, self.host_id, &self.clock)?;
            let account_id = claims.account_id()?;
            return Ok(AuthId::Account(account_id));
        }
        Err(BusAuthError::MissingCredentials)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
