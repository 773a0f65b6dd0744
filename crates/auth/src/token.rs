// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routed project-host bearer tokens.
//!
//! The master mints these; the host only verifies. Compact JWT form
//! (`base64url(header).base64url(claims).base64url(signature)`) signed with
//! Ed25519. The verification key arrives from the master at registration and
//! may be replaced at runtime by key-broadcast updates.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use ph_core::Clock;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("no verification key installed")]
    NoKey,

    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("wrong audience")]
    WrongAudience,

    #[error("unsupported actor {0:?}")]
    WrongActor(String),

    #[error("subject is not an account id")]
    BadSubject,

    #[error("invalid verification key")]
    BadKey,
}

/// Claims of a routed project-host token.
///
/// Holder semantics: the master authorized account `sub` to act on
/// `project_id` at host `aud` until `exp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedClaims {
    pub sub: String,
    pub aud: Uuid,
    pub act: String,
    pub iat: u64,
    pub exp: u64,
    pub project_id: Uuid,
}

impl RoutedClaims {
    /// The verified account id. Only meaningful after [`KeyStore::verify`].
    pub fn account_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::BadSubject)
    }
}

/// Holds the master's token-verification public key.
///
/// Explicitly installed at registration and replaced by key-broadcast
/// updates; constructed empty so tests can exercise the no-key path.
#[derive(Default)]
pub struct KeyStore {
    key: RwLock<Option<VerifyingKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the verification key from its base64 raw form.
    pub fn install_base64(&self, encoded: &str) -> Result<(), TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(encoded.trim()))
            .map_err(|_| TokenError::BadKey)?;
        let raw: [u8; 32] = bytes.try_into().map_err(|_| TokenError::BadKey)?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| TokenError::BadKey)?;
        *self.key.write() = Some(key);
        Ok(())
    }

    /// Install a key directly (tests, in-process masters).
    pub fn install(&self, key: VerifyingKey) {
        *self.key.write() = Some(key);
    }

    pub fn has_key(&self) -> bool {
        self.key.read().is_some()
    }

    /// Verify a routed token for this host.
    ///
    /// Checks, in order: signature, `exp > now`, `aud == host_id`,
    /// `act == "account"`, `sub` parses as a UUID.
    pub fn verify(
        &self,
        token: &str,
        host_id: Uuid,
        clock: &impl Clock,
    ) -> Result<RoutedClaims, TokenError> {
        let key = (*self.key.read()).ok_or(TokenError::NoKey)?;
        let claims = decode_and_check_signature(token, &key)?;
        if claims.exp <= clock.epoch_secs() {
            return Err(TokenError::Expired);
        }
        if claims.aud != host_id {
            return Err(TokenError::WrongAudience);
        }
        if claims.act != "account" {
            return Err(TokenError::WrongActor(claims.act));
        }
        claims.account_id()?;
        Ok(claims)
    }
}

fn decode_and_check_signature(
    token: &str,
    key: &VerifyingKey,
) -> Result<RoutedClaims, TokenError> {
    let mut parts = token.split('.');
    let (header, payload, sig) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(TokenError::Malformed),
    };
    let message = format!("{header}.{payload}");
    let sig_bytes = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| TokenError::Malformed)?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify_strict(message.as_bytes(), &signature).map_err(|_| TokenError::BadSignature)?;
    let claims = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&claims).map_err(|_| TokenError::Malformed)
}

/// Test-and-fixture helper: mint a token the way the master does.
///
/// Production code never calls this; the host holds no signing key.
pub fn sign_for_tests(
    signing_key: &ed25519_dalek::SigningKey,
    claims: &RoutedClaims,
) -> String {
    use ed25519_dalek::Signer as _;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    let message = format!("{header}.{payload}");
    let signature = signing_key.sign(message.as_bytes());
    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
