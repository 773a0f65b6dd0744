// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation ID generation.

use serde::{Deserialize, Serialize};

/// Length of the random suffix in a generated [`OpId`].
const SUFFIX_LEN: usize = 19;

/// ID of a long-running operation: `lro-` + 19-char nanoid.
///
/// Accounts, projects and hosts are keyed by UUID; operation IDs use the
/// prefixed-nanoid form so they are recognizable in logs and short enough
/// to paste into a CLI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(String);

impl OpId {
    pub const PREFIX: &'static str = "lro-";

    /// Generate a new random operation ID.
    pub fn new() -> Self {
        Self(format!("{}{}", Self::PREFIX, nanoid::nanoid!(SUFFIX_LEN)))
    }

    /// Wrap an existing string (parsing/deserialization).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ID without its type prefix.
    pub fn suffix(&self) -> &str {
        self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0)
    }

    /// Suffix truncated to at most `n` characters, for table display.
    pub fn short(&self, n: usize) -> &str {
        let suffix = self.suffix();
        &suffix[..n.min(suffix.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OpId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for OpId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for OpId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for OpId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for OpId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::borrow::Borrow<str> for OpId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
