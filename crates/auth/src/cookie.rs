// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie names and `Cookie:` header parsing for the proxy and bus.

use sha2::{Digest, Sha256};

/// Session cookie issued by the proxy after bearer verification.
pub const SESSION_COOKIE: &str = "cocalc_project_host_http_session";

/// Query parameter carrying a bearer token (stripped before forwarding).
pub const AUTH_QUERY_PARAM: &str = "cocalc_project_host_http_auth";

/// Cookie carrying the local conat password for internal services.
pub const SYSTEM_COOKIE: &str = "cocalc_project_host_system";

/// Cookie pair a workspace process signs in with.
pub const PROJECT_SECRET_COOKIE: &str = "cocalc_project_host_project_secret";
pub const PROJECT_ID_COOKIE: &str = "cocalc_project_host_project_id";

/// The session cookie name for a given base path.
///
/// The root path uses the canonical name; other base paths get a stable
/// 8-hex suffix so hosts served under different prefixes don't clobber each
/// other's sessions.
pub fn session_cookie_name(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        return SESSION_COOKIE.to_string();
    }
    let digest = Sha256::digest(trimmed.as_bytes());
    let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{SESSION_COOKIE}-{suffix}")
}

/// Extract a cookie value from a `Cookie:` header.
pub fn get_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name).then(|| v.trim())
    })
}

#[cfg(test)]
#[path = "cookie_tests.rs"]
mod tests;
