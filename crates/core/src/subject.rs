// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dotted bus subjects: scope extraction and wildcard matching.
//!
//! Subjects follow the conat convention: `project.<uuid>.api`,
//! `account.<uuid>.inbox`, `hub.api`, `hosts.<uuid>.control`, and reply
//! subjects under `_INBOX.<identity>.…`. Subscription patterns may use `*`
//! (one token) and a trailing `>` (rest of subject).

use uuid::Uuid;

/// Who a subject is scoped to, derived from its leading tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectScope {
    /// `hub` or `hub.…` — the master-facing service plane.
    Hub,
    /// `account.<uuid>.…`
    Account(Uuid),
    /// `project.<uuid>.…`
    Project(Uuid),
    /// `hosts.<uuid>.…` — a host control service.
    Host(Uuid),
    /// `_INBOX.<identity>.…` — a reply subject.
    Inbox,
    /// Anything else (heartbeats, ad-hoc subjects).
    Other,
}

/// Extract the scope of a subject.
pub fn scope_of(subject: &str) -> SubjectScope {
    let mut tokens = subject.split('.');
    let head = tokens.next().unwrap_or("");
    match head {
        "hub" => SubjectScope::Hub,
        "_INBOX" => SubjectScope::Inbox,
        "account" | "project" | "hosts" => {
            let id = tokens.next().and_then(|t| Uuid::parse_str(t).ok());
            match (head, id) {
                ("account", Some(id)) => SubjectScope::Account(id),
                ("project", Some(id)) => SubjectScope::Project(id),
                ("hosts", Some(id)) => SubjectScope::Host(id),
                _ => SubjectScope::Other,
            }
        }
        _ => SubjectScope::Other,
    }
}

/// The identity token of an inbox subject: `_INBOX.account-<uuid>.x` →
/// `account-<uuid>`. `None` for non-inbox subjects.
pub fn inbox_owner(subject: &str) -> Option<&str> {
    let rest = subject.strip_prefix("_INBOX.")?;
    Some(rest.split('.').next().unwrap_or(rest))
}

/// True if `subject` is a heartbeat subject (allowed for every identity).
pub fn is_heartbeat(subject: &str) -> bool {
    subject == "heartbeats" || subject.starts_with("heartbeats.")
}

/// NATS-style pattern match: `*` matches exactly one token, a trailing `>`
/// matches one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (None, None) => return true,
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            _ => return false,
        }
    }
}

/// Validate a publishable subject: non-empty dot-separated tokens of
/// `[A-Za-z0-9_-]` (no wildcards).
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject.split('.').all(|t| {
            !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

/// Validate a subscription pattern: like [`is_valid_subject`] but `*` tokens
/// are allowed anywhere and `>` only as the final token.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, t)| match *t {
        "*" => true,
        ">" => i == last,
        t => {
            !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
    })
}

#[cfg(test)]
#[path = "subject_tests.rs"]
mod tests;
