// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth profiles: `<config>/cocalc/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ph_wire::AuthGlobals;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid profile name {0:?} (allowed: [a-zA-Z0-9._-]+)")]
    BadProfileName(String),

    #[error("no such profile {0:?}")]
    UnknownProfile(String),
}

/// One saved credential set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, AuthProfile>,
}

pub fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Default config path: `<config>/cocalc/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cocalc")
        .join("config.json")
}

pub fn load_auth_config(path: &Path) -> Result<AuthConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AuthConfig::default())
        }
        Err(source) => return Err(ConfigError::Io { path: path.to_path_buf(), source }),
    };
    let config: AuthConfig = serde_json::from_str(&raw)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    for name in config.profiles.keys() {
        if !is_valid_profile_name(name) {
            return Err(ConfigError::BadProfileName(name.clone()));
        }
    }
    Ok(config)
}

pub fn save_auth_config(config: &AuthConfig, path: &Path) -> Result<(), ConfigError> {
    for name in config.profiles.keys() {
        if !is_valid_profile_name(name) {
            return Err(ConfigError::BadProfileName(name.clone()));
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| ConfigError::Io { path: parent.to_path_buf(), source })?;
    }
    let raw = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, raw)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
}

/// Merge a named (or current) profile with CLI overrides into the globals
/// sent to the daemon. CLI flags win over the profile.
pub fn resolve_globals(
    config: &AuthConfig,
    profile_flag: Option<&str>,
    overrides: &AuthGlobals,
) -> Result<AuthGlobals, ConfigError> {
    let profile_name = profile_flag
        .map(String::from)
        .or_else(|| config.current_profile.clone());
    let profile = match &profile_name {
        Some(name) => {
            if !is_valid_profile_name(name) {
                return Err(ConfigError::BadProfileName(name.clone()));
            }
            Some(
                config
                    .profiles
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownProfile(name.clone()))?,
            )
        }
        None => None,
    };
    let pick = |over: &Option<String>, prof: fn(&AuthProfile) -> &Option<String>| {
        over.clone().or_else(|| profile.and_then(|p| prof(p).clone()))
    };
    Ok(AuthGlobals {
        profile: profile_name,
        api: pick(&overrides.api, |p| &p.api),
        account_id: pick(&overrides.account_id, |p| &p.account_id),
        api_key: pick(&overrides.api_key, |p| &p.api_key),
        cookie: pick(&overrides.cookie, |p| &p.cookie),
        bearer: pick(&overrides.bearer, |p| &p.bearer),
        hub_password: pick(&overrides.hub_password, |p| &p.hub_password),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
