// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth primitives: routed bearer-token verification, HMAC session tokens,
//! cookie handling, and the subject-level ACL predicate.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod acl;
pub mod cookie;
pub mod session;
pub mod token;

pub use acl::{Authorizer, CollaboratorSource, OpKind, StaticCollaborators};
pub use cookie::{
    get_cookie, session_cookie_name, AUTH_QUERY_PARAM, PROJECT_ID_COOKIE, PROJECT_SECRET_COOKIE,
    SESSION_COOKIE, SYSTEM_COOKIE,
};
pub use session::{SessionKey, SessionPayload, DEFAULT_SESSION_TTL_SECS, MIN_SESSION_TTL_SECS};
pub use token::{KeyStore, RoutedClaims, TokenError};
