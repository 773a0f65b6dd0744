// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boundary parsers shared across the workspace.
//!
//! These exist exactly once; callers must not re-implement them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid duration: {0:?}")]
    Duration(String),

    #[error("invalid ssh endpoint: {0:?}")]
    SshEndpoint(String),
}

/// Parse a human duration into milliseconds.
///
/// `"250ms"` → 250, `"2s"` → 2000, `"3m"` → 180000, `"1h"` → 3600000.
/// A bare number is seconds: `"7"` → 7000.
pub fn parse_duration_ms(input: &str) -> Result<u64, ParseError> {
    let s = input.trim();
    let err = || ParseError::Duration(input.to_string());
    if s.is_empty() {
        return Err(err());
    }
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60 * 1000)
    } else {
        (s, 1000)
    };
    let value: u64 = digits.parse().map_err(|_| err())?;
    Ok(value * multiplier)
}

/// Normalize a server URL: default the scheme to `http://` and drop trailing
/// slashes. `"localhost:9100/"` → `"http://localhost:9100"`.
pub fn normalize_url(input: &str) -> String {
    let s = input.trim();
    let with_scheme =
        if s.contains("://") { s.to_string() } else { format!("http://{s}") };
    with_scheme.trim_end_matches('/').to_string()
}

/// True for HTTP redirect status codes.
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// A parsed `host[:port]` ssh endpoint. IPv6 literals use brackets:
/// `[2001:db8::1]:2200`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    pub port: Option<u16>,
}

pub fn parse_ssh_endpoint(input: &str) -> Result<SshEndpoint, ParseError> {
    let s = input.trim();
    let err = || ParseError::SshEndpoint(input.to_string());
    if s.is_empty() {
        return Err(err());
    }
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(err)?;
        if host.is_empty() {
            return Err(err());
        }
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p.parse().map_err(|_| err())?),
            None if tail.is_empty() => None,
            None => return Err(err()),
        };
        return Ok(SshEndpoint { host: host.to_string(), port });
    }
    match s.rsplit_once(':') {
        // A second ':' means an unbracketed IPv6 literal; treat as host-only.
        Some((host, _)) if host.contains(':') => {
            Ok(SshEndpoint { host: s.to_string(), port: None })
        }
        Some((host, port)) => {
            if host.is_empty() {
                return Err(err());
            }
            let port = port.parse().map_err(|_| err())?;
            Ok(SshEndpoint { host: host.to_string(), port: Some(port) })
        }
        None => Ok(SshEndpoint { host: s.to_string(), port: None }),
    }
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
