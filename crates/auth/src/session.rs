// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-signed session tokens backing the proxy's long-lived cookie.
//!
//! Token form: `base64url(JSON payload) "." base64url(HMAC-SHA256(secret,
//! encoded payload))`. Opaque to the browser; the host holds only the
//! symmetric key. Every parse/signature/expiry failure collapses to "no
//! session" so the proxy falls through to bearer-token auth.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use ph_core::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Default session lifetime: 30 days.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

/// Sessions shorter than this are not useful; issuance clamps up.
pub const MIN_SESSION_TTL_SECS: u64 = 300;

/// Signed content of a session token.
///
/// `iat` is preserved so revocation checks can compare issuance time against
/// `revoked_before_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub account_id: Uuid,
    pub iat: u64,
    pub exp: u64,
    pub nonce: String,
}

/// The host-local symmetric session key.
#[derive(Clone)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// Issue a session token for `account_id` valid for `ttl_secs`
    /// (clamped to at least [`MIN_SESSION_TTL_SECS`]).
    pub fn issue(&self, account_id: Uuid, ttl_secs: u64, clock: &impl Clock) -> String {
        let now = clock.epoch_secs();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = SessionPayload {
            account_id,
            iat: now,
            exp: now + ttl_secs.max(MIN_SESSION_TTL_SECS),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
        };
        self.encode(&payload)
    }

    /// Sign an explicit payload (tests and re-issue paths).
    pub fn encode(&self, payload: &SessionPayload) -> String {
        let encoded =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap_or_default());
        format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(self.sign(encoded.as_bytes())))
    }

    /// Verify a token. Returns the payload only when the signature checks
    /// out (constant-time) and `exp` is in the future.
    pub fn verify(&self, token: &str, clock: &impl Clock) -> Option<SessionPayload> {
        let (encoded, sig) = token.split_once('.')?;
        let sig = URL_SAFE_NO_PAD.decode(sig).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.0).ok()?;
        mac.update(encoded.as_bytes());
        mac.verify_slice(&sig).ok()?;
        let payload: SessionPayload =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(encoded).ok()?).ok()?;
        if payload.exp <= clock.epoch_secs() {
            return None;
        }
        Some(payload)
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match HmacSha256::new_from_slice(&self.0) {
            Ok(mut mac) => {
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            // HMAC accepts any key length; new_from_slice cannot fail for SHA-256.
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
