// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The host's control service, served under `hosts.<host_id>.control`.
//!
//! Every method validates its inputs against local tables before touching
//! the container/filesystem adapters. Long work (create, delete, upgrade)
//! runs as LROs whose ids the master polls through the `lro*` hooks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use ph_bus::RpcService;
use ph_core::{Clock, OpId};
use ph_lro::{LroRuntime, OpScope, SubmitOpts};
use ph_store::{Db, Deleted, ProjectRow, ProjectUser};

use crate::adapters::{ContainerRuntime, FsOps};
use crate::creds::CodexCache;
use crate::device_auth::DeviceAuthPrompt;

/// Subject the control service listens on.
pub fn control_subject(host_id: Uuid) -> String {
    format!("hosts.{host_id}.control")
}

#[derive(Clone)]
struct ControlCtx<C: Clock> {
    db: Arc<Db>,
    containers: Arc<dyn ContainerRuntime>,
    fs: Arc<dyn FsOps>,
    lro: LroRuntime<C>,
    creds: Arc<CodexCache<C>>,
    login_command: Arc<Vec<String>>,
    host_id: Uuid,
}

impl<C: Clock> ControlCtx<C> {
    fn live_project(&self, project_id: Uuid) -> Result<ProjectRow, String> {
        let row = self
            .db
            .project(project_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown project {project_id}"))?;
        if row.deleted.is_deleted() {
            return Err(format!("project {project_id} is deleted"));
        }
        Ok(row)
    }

    fn set_state(&self, mut row: ProjectRow, state: &str) -> Result<(), String> {
        row.state = Some(ph_store::types::ProjectState { state: state.to_string() });
        self.db.upsert_project(&row).map_err(|e| e.to_string())
    }
}

#[derive(Deserialize)]
struct ProjectArg {
    project_id: Uuid,
}

#[derive(Deserialize)]
struct CreateArgs {
    project_id: Uuid,
    #[serde(default)]
    title: String,
    #[serde(default = "default_image")]
    image: String,
    #[serde(default)]
    users: HashMap<Uuid, ProjectUser>,
}

fn default_image() -> String {
    "cocalc-workspace:latest".to_string()
}

#[derive(Deserialize)]
struct AuthorizedKeysArgs {
    project_id: Uuid,
    authorized_keys: String,
}

#[derive(Deserialize)]
struct UsersArgs {
    project_id: Uuid,
    users: HashMap<Uuid, ProjectUser>,
}

#[derive(Deserialize)]
struct GrowDiskArgs {
    project_id: Uuid,
    bytes: u64,
}

#[derive(Deserialize)]
struct UpgradeArgs {
    version: String,
}

#[derive(Deserialize)]
struct AccountArg {
    account_id: Uuid,
}

#[derive(Deserialize)]
struct LroGetArgs {
    op_id: String,
}

#[derive(Deserialize)]
struct LroListArgs {
    #[serde(default)]
    include_completed: bool,
}

/// Build the control service over the host's local state and adapters.
pub fn control_service<C: Clock>(
    db: Arc<Db>,
    containers: Arc<dyn ContainerRuntime>,
    fs: Arc<dyn FsOps>,
    lro: LroRuntime<C>,
    creds: Arc<CodexCache<C>>,
    login_command: Vec<String>,
    host_id: Uuid,
) -> RpcService {
    let ctx = ControlCtx {
        db,
        containers,
        fs,
        lro,
        creds,
        login_command: Arc::new(login_command),
        host_id,
    };

    let create = ctx.clone();
    let start = ctx.clone();
    let stop = ctx.clone();
    let keys = ctx.clone();
    let users = ctx.clone();
    let delete = ctx.clone();
    let upgrade = ctx.clone();
    let grow = ctx.clone();
    let login = ctx.clone();
    let lro_get = ctx.clone();
    let lro_cancel = ctx.clone();
    let lro_list = ctx;

    RpcService::new()
        .method("createProject", move |args| {
            let ctx = create.clone();
            Box::pin(async move {
                let args: CreateArgs = parse(args)?;
                if ctx.db.project(args.project_id).map_err(|e| e.to_string())?.is_some() {
                    return Err(format!("project {} already exists", args.project_id));
                }
                let mut row = ProjectRow::new(args.project_id, args.title);
                row.host_id = Some(ctx.host_id);
                row.users = args.users;
                ctx.db.upsert_project(&row).map_err(|e| e.to_string())?;

                let op_id = ctx.lro.submit(
                    "project.create",
                    OpScope::project(args.project_id),
                    serde_json::json!({ "image": args.image }),
                    SubmitOpts::default(),
                    {
                        let ctx = ctx.clone();
                        Box::new(move |_cancel| {
                            Box::pin(async move {
                                ctx.fs
                                    .create_workspace(args.project_id)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                ctx.containers
                                    .create_project(args.project_id, &args.image)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                Ok(serde_json::json!({ "created": args.project_id }))
                            })
                        })
                    },
                );
                Ok(serde_json::json!({ "op_id": op_id }))
            })
        })
        .method("startProject", move |args| {
            let ctx = start.clone();
            Box::pin(async move {
                let args: ProjectArg = parse(args)?;
                let row = ctx.live_project(args.project_id)?;
                ctx.containers
                    .start_project(args.project_id)
                    .await
                    .map_err(|e| e.to_string())?;
                ctx.set_state(row, "running")?;
                Ok(serde_json::json!({ "started": args.project_id }))
            })
        })
        .method("stopProject", move |args| {
            let ctx = stop.clone();
            Box::pin(async move {
                let args: ProjectArg = parse(args)?;
                let row = ctx.live_project(args.project_id)?;
                ctx.containers
                    .stop_project(args.project_id)
                    .await
                    .map_err(|e| e.to_string())?;
                ctx.set_state(row, "off")?;
                Ok(serde_json::json!({ "stopped": args.project_id }))
            })
        })
        .method("updateAuthorizedKeys", move |args| {
            let ctx = keys.clone();
            Box::pin(async move {
                let args: AuthorizedKeysArgs = parse(args)?;
                ctx.live_project(args.project_id)?;
                ctx.fs
                    .write_authorized_keys(args.project_id, &args.authorized_keys)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "updated": args.project_id }))
            })
        })
        .method("updateProjectUsers", move |args| {
            let ctx = users.clone();
            Box::pin(async move {
                let args: UsersArgs = parse(args)?;
                let mut row = ctx.live_project(args.project_id)?;
                row.users = args.users;
                ctx.db.upsert_project(&row).map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "updated": args.project_id }))
            })
        })
        .method("deleteProjectData", move |args| {
            let ctx = delete.clone();
            Box::pin(async move {
                let args: ProjectArg = parse(args)?;
                let mut row = ctx.live_project(args.project_id)?;
                let op_id = ctx.lro.submit(
                    "project.delete-data",
                    OpScope::project(args.project_id),
                    serde_json::Value::Null,
                    SubmitOpts::default(),
                    {
                        let ctx = ctx.clone();
                        Box::new(move |_cancel| {
                            Box::pin(async move {
                                ctx.containers
                                    .remove_project(args.project_id)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                ctx.fs
                                    .delete_workspace(args.project_id)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                Ok(serde_json::json!({ "deleted": args.project_id }))
                            })
                        })
                    },
                );
                row.deleted = Deleted::At(chrono::Utc::now().timestamp_millis() as u64);
                ctx.db.upsert_project(&row).map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "op_id": op_id }))
            })
        })
        .method("upgradeSoftware", move |args| {
            let ctx = upgrade.clone();
            Box::pin(async move {
                let args: UpgradeArgs = parse(args)?;
                if args.version.trim().is_empty() {
                    return Err("version must not be empty".to_string());
                }
                let op_id = ctx.lro.submit(
                    "host.upgrade",
                    OpScope::host(ctx.host_id),
                    serde_json::json!({ "version": args.version }),
                    SubmitOpts::default(),
                    Box::new(move |_cancel| {
                        Box::pin(async move {
                            Ok(serde_json::json!({ "scheduled": args.version }))
                        })
                    }),
                );
                Ok(serde_json::json!({ "op_id": op_id }))
            })
        })
        .method("growDisk", move |args| {
            let ctx = grow.clone();
            Box::pin(async move {
                let args: GrowDiskArgs = parse(args)?;
                if args.bytes == 0 {
                    return Err("bytes must be positive".to_string());
                }
                ctx.live_project(args.project_id)?;
                ctx.fs
                    .grow_disk(args.project_id, args.bytes)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(serde_json::json!({ "grown": args.project_id }))
            })
        })
        .method("codexDeviceLogin", move |args| {
            let ctx = login.clone();
            Box::pin(async move {
                let args: AccountArg = parse(args)?;
                // The handler learns its own op id through the slot so the
                // device prompt can be surfaced as LRO progress.
                let op_slot: Arc<parking_lot::Mutex<Option<OpId>>> =
                    Arc::new(parking_lot::Mutex::new(None));
                let op_id = ctx.lro.submit(
                    "codex.device-login",
                    OpScope::account(args.account_id),
                    serde_json::Value::Null,
                    SubmitOpts::default(),
                    {
                        let ctx = ctx.clone();
                        let op_slot = Arc::clone(&op_slot);
                        Box::new(move |_cancel| {
                            Box::pin(async move {
                                let lro = ctx.lro.clone();
                                let on_prompt = {
                                    let op_slot = Arc::clone(&op_slot);
                                    move |prompt: DeviceAuthPrompt| {
                                        if let Some(op_id) = op_slot.lock().clone() {
                                            lro.update_progress(
                                                &op_id,
                                                format!(
                                                    "visit {} and enter code {}",
                                                    prompt.url, prompt.code
                                                ),
                                            );
                                        }
                                    }
                                };
                                let dir = ctx
                                    .creds
                                    .run_device_login(
                                        args.account_id,
                                        ctx.login_command.as_slice(),
                                        on_prompt,
                                    )
                                    .await
                                    .map_err(|e| e.to_string())?;
                                Ok(serde_json::json!({
                                    "credential_dir": dir.display().to_string(),
                                }))
                            })
                        })
                    },
                );
                *op_slot.lock() = Some(op_id.clone());
                Ok(serde_json::json!({ "op_id": op_id }))
            })
        })
        .method("lroGet", move |args| {
            let ctx = lro_get.clone();
            Box::pin(async move {
                let args: LroGetArgs = parse(args)?;
                let summary = ctx
                    .lro
                    .get(&OpId::from_string(args.op_id.clone()))
                    .ok_or_else(|| format!("unknown operation {}", args.op_id))?;
                serde_json::to_value(&summary).map_err(|e| e.to_string())
            })
        })
        .method("lroCancel", move |args| {
            let ctx = lro_cancel.clone();
            Box::pin(async move {
                let args: LroGetArgs = parse(args)?;
                let canceled = ctx.lro.cancel(&OpId::from_string(args.op_id));
                Ok(serde_json::json!({ "canceled": canceled }))
            })
        })
        .method("lroList", move |args| {
            let ctx = lro_list.clone();
            Box::pin(async move {
                let args: LroListArgs = parse(args)?;
                let summaries = ctx.lro.list(None, args.include_completed);
                serde_json::to_value(&summaries).map_err(|e| e.to_string())
            })
        })
}

fn parse<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
