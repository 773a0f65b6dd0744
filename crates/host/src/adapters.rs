// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborators behind traits: the container runtime (podman)
//! and the filesystem subsystem (btrfs subvolumes). Production
//! implementations shell out; tests inject fakes that record calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {program}: {detail}")]
    BadOutput { program: String, detail: String },
}

/// The container runtime the host drives (podman/crun).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_project(&self, project_id: Uuid, image: &str) -> Result<(), AdapterError>;
    async fn start_project(&self, project_id: Uuid) -> Result<(), AdapterError>;
    async fn stop_project(&self, project_id: Uuid) -> Result<(), AdapterError>;
    async fn remove_project(&self, project_id: Uuid) -> Result<(), AdapterError>;

    /// Host paths of live-container mounts whose destination is
    /// `destination` (credential-cache GC consults this).
    async fn mounts_with_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<PathBuf>, AdapterError>;

    /// Local address serving `port` inside the project's container.
    async fn upstream_addr(
        &self,
        project_id: Uuid,
        port: u16,
    ) -> Result<String, AdapterError>;
}

/// The filesystem subsystem (btrfs subvolumes, quotas, authorized keys).
#[async_trait]
pub trait FsOps: Send + Sync {
    async fn create_workspace(&self, project_id: Uuid) -> Result<(), AdapterError>;
    async fn delete_workspace(&self, project_id: Uuid) -> Result<(), AdapterError>;
    async fn grow_disk(&self, project_id: Uuid, bytes: u64) -> Result<(), AdapterError>;
    async fn write_authorized_keys(
        &self,
        project_id: Uuid,
        keys: &str,
    ) -> Result<(), AdapterError>;
}

async fn run_checked(program: &str, args: &[String]) -> Result<String, AdapterError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| AdapterError::Spawn { program: program.to_string(), source })?;
    if !output.status.success() {
        return Err(AdapterError::CommandFailed {
            program: program.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Podman-backed runtime. Container names are `project-<uuid>`.
pub struct PodmanRuntime {
    program: String,
}

impl PodmanRuntime {
    pub fn new() -> Self {
        Self { program: "podman".to_string() }
    }

    fn container_name(project_id: Uuid) -> String {
        format!("project-{project_id}")
    }
}

impl Default for PodmanRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn create_project(&self, project_id: Uuid, image: &str) -> Result<(), AdapterError> {
        let args = vec![
            "create".to_string(),
            "--name".to_string(),
            Self::container_name(project_id),
            image.to_string(),
        ];
        run_checked(&self.program, &args).await.map(|_| ())
    }

    async fn start_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        let args = vec!["start".to_string(), Self::container_name(project_id)];
        run_checked(&self.program, &args).await.map(|_| ())
    }

    async fn stop_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        let args = vec!["stop".to_string(), Self::container_name(project_id)];
        run_checked(&self.program, &args).await.map(|_| ())
    }

    async fn remove_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        let args = vec!["rm".to_string(), "-f".to_string(), Self::container_name(project_id)];
        run_checked(&self.program, &args).await.map(|_| ())
    }

    async fn mounts_with_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        // `podman ps --format json` lists live containers with Mounts.
        let args = vec!["ps".to_string(), "--format".to_string(), "json".to_string()];
        let stdout = run_checked(&self.program, &args).await?;
        parse_mounts(&stdout, destination).map_err(|detail| AdapterError::BadOutput {
            program: self.program.clone(),
            detail,
        })
    }

    async fn upstream_addr(
        &self,
        project_id: Uuid,
        port: u16,
    ) -> Result<String, AdapterError> {
        let args = vec![
            "port".to_string(),
            Self::container_name(project_id),
            port.to_string(),
        ];
        let stdout = run_checked(&self.program, &args).await?;
        stdout
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| AdapterError::BadOutput {
                program: self.program.clone(),
                detail: format!("no published address for port {port}"),
            })
    }
}

/// Extract source paths of mounts with the given destination from
/// `podman ps --format json` output.
fn parse_mounts(json: &str, destination: &str) -> Result<Vec<PathBuf>, String> {
    #[derive(serde::Deserialize)]
    struct Container {
        #[serde(default, rename = "Mounts")]
        mounts: Vec<MountEntry>,
    }
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum MountEntry {
        Detailed {
            #[serde(rename = "Destination")]
            destination: String,
            #[serde(rename = "Source")]
            source: String,
        },
        // Older podman prints bare destination strings; no source to report.
        Bare(String),
    }
    let containers: Vec<Container> = serde_json::from_str(json).map_err(|e| e.to_string())?;
    Ok(containers
        .into_iter()
        .flat_map(|c| c.mounts)
        .filter_map(|m| match m {
            MountEntry::Detailed { destination: d, source } if d == destination => {
                Some(PathBuf::from(source))
            }
            _ => None,
        })
        .collect())
}

/// In-memory fake recording calls, for tests.
#[derive(Default)]
pub struct FakeContainerRuntime {
    pub calls: Mutex<Vec<String>>,
    /// destination → mount sources reported as live.
    pub mounts: Mutex<HashMap<String, Vec<PathBuf>>>,
    pub upstream: Mutex<HashMap<(Uuid, u16), String>>,
    pub fail_next: Mutex<Option<String>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mount(&self, destination: &str, source: &Path) {
        self.mounts
            .lock()
            .entry(destination.to_string())
            .or_default()
            .push(source.to_path_buf());
    }

    pub fn clear_mounts(&self) {
        self.mounts.lock().clear();
    }

    pub fn set_upstream(&self, project_id: Uuid, port: u16, addr: impl Into<String>) {
        self.upstream.lock().insert((project_id, port), addr.into());
    }

    fn record(&self, call: String) -> Result<(), AdapterError> {
        if let Some(message) = self.fail_next.lock().take() {
            return Err(AdapterError::CommandFailed { program: "fake".into(), stderr: message });
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn create_project(&self, project_id: Uuid, image: &str) -> Result<(), AdapterError> {
        self.record(format!("create {project_id} {image}"))
    }

    async fn start_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        self.record(format!("start {project_id}"))
    }

    async fn stop_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        self.record(format!("stop {project_id}"))
    }

    async fn remove_project(&self, project_id: Uuid) -> Result<(), AdapterError> {
        self.record(format!("rm {project_id}"))
    }

    async fn mounts_with_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<PathBuf>, AdapterError> {
        if let Some(message) = self.fail_next.lock().take() {
            return Err(AdapterError::CommandFailed { program: "fake".into(), stderr: message });
        }
        Ok(self.mounts.lock().get(destination).cloned().unwrap_or_default())
    }

    async fn upstream_addr(
        &self,
        project_id: Uuid,
        port: u16,
    ) -> Result<String, AdapterError> {
        self.upstream.lock().get(&(project_id, port)).cloned().ok_or_else(|| {
            AdapterError::BadOutput {
                program: "fake".into(),
                detail: format!("no upstream for {project_id}:{port}"),
            }
        })
    }
}

/// Fake filesystem ops recording calls.
#[derive(Default)]
pub struct FakeFsOps {
    pub calls: Mutex<Vec<String>>,
}

impl FakeFsOps {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FsOps for FakeFsOps {
    async fn create_workspace(&self, project_id: Uuid) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("create_workspace {project_id}"));
        Ok(())
    }

    async fn delete_workspace(&self, project_id: Uuid) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("delete_workspace {project_id}"));
        Ok(())
    }

    async fn grow_disk(&self, project_id: Uuid, bytes: u64) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("grow_disk {project_id} {bytes}"));
        Ok(())
    }

    async fn write_authorized_keys(
        &self,
        project_id: Uuid,
        keys: &str,
    ) -> Result<(), AdapterError> {
        self.calls.lock().push(format!("authorized_keys {project_id} {} bytes", keys.len()));
        Ok(())
    }
}

#[cfg(test)]
#[path = "adapters_tests.rs"]
mod tests;
