// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cocalc workspace` - manage the `.cocalc-workspace` context.

use clap::Subcommand;
use uuid::Uuid;

use super::Ctx;
use crate::exit_error::ExitError;
use crate::output::{print_output, OutputFormat};
use crate::workspace::{
    clear_workspace_context, find_workspace_context, save_workspace_context, WorkspaceContext,
};

#[derive(Subcommand)]
pub enum WorkspaceCommand {
    /// Bind this directory to a workspace
    Set {
        workspace_id: Uuid,
        #[arg(long)]
        title: Option<String>,
    },
    /// Show the effective workspace context
    Show,
    /// Remove the binding from this directory
    Clear,
}

pub fn workspace(command: WorkspaceCommand, ctx: &Ctx) -> Result<(), ExitError> {
    let cwd = std::env::current_dir().map_err(|e| ExitError::failure(e.to_string()))?;
    match command {
        WorkspaceCommand::Set { workspace_id, title } => {
            let context = WorkspaceContext {
                workspace_id,
                title,
                set_at: Some(chrono::Utc::now().to_rfc3339()),
            };
            save_workspace_context(&cwd, &context)
                .map_err(|e| ExitError::failure(e.to_string()))?;
            if ctx.format == OutputFormat::Table {
                println!("Workspace set to {workspace_id}");
            }
            Ok(())
        }
        WorkspaceCommand::Show => {
            let context = find_workspace_context(&cwd)
                .map_err(|e| ExitError::failure(e.to_string()))?;
            print_output(ctx.format, &context, || {
                let mut out = format!("Workspace: {}", context.workspace_id);
                if let Some(title) = &context.title {
                    out.push_str(&format!("\nTitle: {title}"));
                }
                out
            })
            .map_err(ExitError::from)
        }
        WorkspaceCommand::Clear => {
            let removed =
                clear_workspace_context(&cwd).map_err(|e| ExitError::failure(e.to_string()))?;
            if ctx.format == OutputFormat::Table {
                println!("{}", if removed { "Workspace cleared" } else { "No workspace was set" });
            }
            Ok(())
        }
    }
}
