// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc auth` - profile management over `config.json`.

use clap::Subcommand;

use super::Ctx;
use crate::config::{default_config_path, load_auth_config, save_auth_config};
use crate::exit_error::ExitError;
use crate::output::{print_output, Table};

#[derive(Subcommand)]
pub enum AuthCommand {
    /// List saved profiles
    List,
    /// Select the default profile
    Use { name: String },
    /// Show the effective profile (secrets redacted)
    Show,
}

pub fn auth(command: AuthCommand, ctx: &Ctx) -> Result<(), ExitError> {
    let path = default_config_path();
    match command {
        AuthCommand::List => {
            let config =
                load_auth_config(&path).map_err(|e| ExitError::failure(e.to_string()))?;
            let names: Vec<serde_json::Value> = config
                .profiles
                .iter()
                .map(|(name, profile)| {
                    serde_json::json!({
                        "name": name,
                        "api": profile.api,
                        "current": config.current_profile.as_deref() == Some(name),
                    })
                })
                .collect();
            print_output(ctx.format, &names, || {
                let mut table = Table::new(vec!["", "NAME", "API"]);
                for (name, profile) in &config.profiles {
                    let marker =
                        if config.current_profile.as_deref() == Some(name) { "*" } else { "" };
                    table.row(vec![
                        marker.to_string(),
                        name.clone(),
                        profile.api.clone().unwrap_or_default(),
                    ]);
                }
                if table.is_empty() {
                    "No profiles saved".to_string()
                } else {
                    table.render()
                }
            })
            .map_err(ExitError::from)
        }
        AuthCommand::Use { name } => {
            let mut config =
                load_auth_config(&path).map_err(|e| ExitError::failure(e.to_string()))?;
            if !config.profiles.contains_key(&name) {
                return Err(ExitError::failure(format!("no such profile {name:?}")));
            }
            config.current_profile = Some(name.clone());
            save_auth_config(&config, &path).map_err(|e| ExitError::failure(e.to_string()))?;
            if ctx.format == crate::output::OutputFormat::Table {
                println!("Using profile {name}");
            }
            Ok(())
        }
        AuthCommand::Show => {
            let redact = |value: &Option<String>| value.as_ref().map(|_| "•••");
            let obj = serde_json::json!({
                "profile": ctx.globals.profile,
                "api": ctx.globals.api,
                "account_id": ctx.globals.account_id,
                "api_key": redact(&ctx.globals.api_key),
                "cookie": redact(&ctx.globals.cookie),
                "bearer": redact(&ctx.globals.bearer),
                "hub_password": redact(&ctx.globals.hub_password),
            });
            print_output(ctx.format, &obj, || {
                let mut lines = Vec::new();
                lines.push(format!(
                    "Profile: {}",
                    ctx.globals.profile.as_deref().unwrap_or("(none)")
                ));
                lines.push(format!("API: {}", ctx.globals.api.as_deref().unwrap_or("(unset)")));
                if let Some(account) = &ctx.globals.account_id {
                    lines.push(format!("Account: {account}"));
                }
                for (label, value) in [
                    ("api key", &ctx.globals.api_key),
                    ("cookie", &ctx.globals.cookie),
                    ("bearer", &ctx.globals.bearer),
                    ("hub password", &ctx.globals.hub_password),
                ] {
                    if value.is_some() {
                        lines.push(format!("Has {label}: yes"));
                    }
                }
                lines.join("\n")
            })
            .map_err(ExitError::from)
        }
    }
}
