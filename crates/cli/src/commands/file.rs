// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc file` - workspace file operations over the daemon.

use std::path::PathBuf;

use clap::Subcommand;

use ph_wire::{Action, FileBytes, FileListing, FoundPaths, SearchMatches};

use super::Ctx;
use crate::exit_error::ExitError;
use crate::output::{format_age, print_output, Table};

#[derive(Subcommand)]
pub enum FileCommand {
    /// List a directory in the workspace
    Ls {
        /// Path inside the workspace (default: workspace root)
        path: Option<String>,
    },
    /// Print a text file
    Cat { path: String },
    /// Upload a local file
    Put {
        local: PathBuf,
        /// Destination path inside the workspace
        remote: String,
    },
    /// Download a file
    Get {
        remote: String,
        /// Local destination (default: basename in the current directory)
        local: Option<PathBuf>,
    },
    /// Remove a file or directory
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Search file contents (ripgrep)
    Rg {
        pattern: String,
        path: Option<String>,
    },
    /// Find files by name (fd)
    Fd {
        pattern: String,
        path: Option<String>,
    },
}

pub async fn file(command: FileCommand, ctx: &Ctx) -> Result<(), ExitError> {
    match command {
        FileCommand::Ls { path } => ls(ctx, path.as_deref().unwrap_or(".")).await,
        FileCommand::Cat { path } => {
            let data = ctx
                .run_action(Action::FileCat, Some(serde_json::json!({ "path": path })))
                .await?;
            let content = data["content"].as_str().unwrap_or_default();
            print!("{content}");
            Ok(())
        }
        FileCommand::Put { local, remote } => {
            let bytes = std::fs::read(&local).map_err(|e| {
                ExitError::failure(format!("cannot read {}: {e}", local.display()))
            })?;
            let payload = serde_json::to_value(FileBytes::from_bytes(remote.clone(), &bytes))
                .map_err(|e| ExitError::failure(e.to_string()))?;
            ctx.run_action(Action::FilePut, Some(payload)).await?;
            if ctx.format == crate::output::OutputFormat::Table {
                println!("Uploaded {} ({} bytes)", remote, bytes.len());
            }
            Ok(())
        }
        FileCommand::Get { remote, local } => {
            let data = ctx
                .run_action(Action::FileGet, Some(serde_json::json!({ "path": remote })))
                .await?;
            let file: FileBytes = serde_json::from_value(data)
                .map_err(|e| ExitError::failure(format!("malformed file payload: {e}")))?;
            let bytes = file
                .to_bytes()
                .map_err(|e| ExitError::failure(format!("corrupt file payload: {e}")))?;
            let destination = local.unwrap_or_else(|| {
                PathBuf::from(remote.rsplit('/').next().unwrap_or(&remote))
            });
            std::fs::write(&destination, &bytes).map_err(|e| {
                ExitError::failure(format!("cannot write {}: {e}", destination.display()))
            })?;
            if ctx.format == crate::output::OutputFormat::Table {
                println!("Saved {} ({} bytes)", destination.display(), bytes.len());
            }
            Ok(())
        }
        FileCommand::Rm { path } => {
            ctx.run_action(Action::FileRm, Some(serde_json::json!({ "path": path.clone() })))
                .await?;
            if ctx.format == crate::output::OutputFormat::Table {
                println!("Removed {path}");
            }
            Ok(())
        }
        FileCommand::Mkdir { path } => {
            ctx.run_action(Action::FileMkdir, Some(serde_json::json!({ "path": path.clone() })))
                .await?;
            if ctx.format == crate::output::OutputFormat::Table {
                println!("Created {path}");
            }
            Ok(())
        }
        FileCommand::Rg { pattern, path } => {
            let data = ctx
                .run_action(
                    Action::FileRg,
                    Some(serde_json::json!({ "pattern": pattern, "path": path })),
                )
                .await?;
            let matches: SearchMatches = serde_json::from_value(data)
                .map_err(|e| ExitError::failure(e.to_string()))?;
            print_output(ctx.format, &matches, || {
                let mut out = matches.matches.join("\n");
                if matches.truncated {
                    out.push_str("\n… (truncated)");
                }
                out
            })
            .map_err(ExitError::from)
        }
        FileCommand::Fd { pattern, path } => {
            let data = ctx
                .run_action(
                    Action::FileFd,
                    Some(serde_json::json!({ "pattern": pattern, "path": path })),
                )
                .await?;
            let paths: FoundPaths = serde_json::from_value(data)
                .map_err(|e| ExitError::failure(e.to_string()))?;
            print_output(ctx.format, &paths, || {
                let mut out = paths.paths.join("\n");
                if paths.truncated {
                    out.push_str("\n… (truncated)");
                }
                out
            })
            .map_err(ExitError::from)
        }
    }
}

async fn ls(ctx: &Ctx, path: &str) -> Result<(), ExitError> {
    let data = ctx
        .run_action(Action::FileList, Some(serde_json::json!({ "path": path })))
        .await?;
    let listing: FileListing =
        serde_json::from_value(data).map_err(|e| ExitError::failure(e.to_string()))?;
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    print_output(ctx.format, &listing, || {
        let mut table = Table::new(vec!["NAME", "SIZE", "MODIFIED"]);
        for entry in &listing.entries {
            let name = if entry.is_dir {
                format!("{}/", entry.name)
            } else {
                entry.name.clone()
            };
            table.row(vec![
                name,
                entry.size.to_string(),
                format_age(entry.mtime_ms, now_ms),
            ]);
        }
        if table.is_empty() {
            "(empty)".to_string()
        } else {
            table.render()
        }
    })
    .map_err(ExitError::from)
}
