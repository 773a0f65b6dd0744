// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup wiring and ordered shutdown for the host daemon.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use ph_auth::acl::{Authorizer, CollaboratorSource};
use ph_auth::{session_cookie_name, KeyStore, SessionKey, DEFAULT_SESSION_TTL_SECS};
use ph_bus::auth::{BusAuth, ProjectSecretSource};
use ph_bus::{BusClient, BusServer};
use ph_core::SystemClock;
use ph_lro::LroRuntime;
use ph_store::{Db, Secrets};

use crate::adapters::{FakeFsOps, PodmanRuntime};
use crate::creds::CodexCache;
use crate::env;
use crate::leases::{ContainerLeases, DEFAULT_LEASE_TTL};
use crate::master::registration::{
    ensure_master_token, install_verification_key, run_heartbeat, run_token_guard,
};
use crate::master::{control, BusMaster, HostRegistration, MasterApi};
use crate::proxy::{AuthGates, ProxyState, WsTracker};
use crate::tunnel::{TunnelOptions, TunnelSupervisor};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store error: {0}")]
    Store(#[from] ph_store::StoreError),

    #[error("secrets error: {0}")]
    Secrets(String),

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("master: {0}")]
    Master(String),
}

/// Collaborator membership straight from the project table.
pub struct DbCollaborators {
    db: Arc<Db>,
}

impl DbCollaborators {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CollaboratorSource for DbCollaborators {
    async fn is_collaborator(&self, account_id: Uuid, project_id: Uuid) -> bool {
        self.db
            .project(project_id)
            .ok()
            .flatten()
            .map(|row| row.visible_to(account_id))
            .unwrap_or(false)
    }
}

/// Project secrets straight from the project table (generated on first
/// read).
pub struct DbProjectSecrets {
    db: Arc<Db>,
}

impl DbProjectSecrets {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProjectSecretSource for DbProjectSecrets {
    async fn project_secret(&self, project_id: Uuid) -> Option<String> {
        self.db.project_secret(project_id).ok()
    }
}

/// Keep the local revocation table in sync with the master's broadcasts,
/// and kick the revoked account's live bus connections. The proxy's
/// upgraded sockets are handled separately by the 30 s tracker sweep.
pub async fn run_revocation_sync<C: ph_core::Clock>(
    client: Arc<BusClient>,
    db: Arc<Db>,
    bus: Arc<BusServer<C>>,
    shutdown: CancellationToken,
) {
    let mut sub = match client.subscribe("hub.revocations") {
        Ok(sub) => sub,
        Err(e) => {
            warn!(%e, "cannot subscribe to revocations");
            return;
        }
    };
    loop {
        let msg = tokio::select! {
            msg = sub.next() => msg,
            _ = shutdown.cancelled() => return,
        };
        let Some(msg) = msg else { return };
        match serde_json::from_value::<ph_store::AccountRevocation>(msg.payload) {
            Ok(revocation) => {
                if let Err(e) = db.apply_revocation(revocation) {
                    warn!(%e, "failed to persist revocation");
                    continue;
                }
                let kicked = bus.disconnect_account(revocation.account_id);
                if kicked > 0 {
                    info!(
                        account_id = %revocation.account_id,
                        kicked,
                        "revocation closed live bus connections"
                    );
                }
            }
            Err(e) => warn!(%e, "malformed revocation broadcast"),
        }
    }
}

/// Bring the whole host up and run until shutdown.
pub async fn run(shutdown: CancellationToken) -> Result<(), StartupError> {
    let data_dir = env::data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| StartupError::Secrets(format!("create {}: {e}", data_dir.display())))?;

    let db = Arc::new(Db::open(&data_dir.join("host.db"))?);
    let host_id = match env::host_id_override() {
        Some(id) => {
            db.set_host_identity(id)?;
            id
        }
        None => db.host_identity()?,
    };
    info!(%host_id, version = env::VERSION, "project host starting");

    let secrets =
        Arc::new(Secrets::with_overrides(env::secrets_dir(), env::secret_overrides()));
    let conat_password =
        secrets.conat_password().map_err(|e| StartupError::Secrets(e.to_string()))?;
    let session_secret =
        secrets.http_session_key().map_err(|e| StartupError::Secrets(e.to_string()))?;

    let clock = SystemClock;
    let keys = Arc::new(KeyStore::new());
    let gates = Arc::new(AuthGates {
        host_id,
        session_key: SessionKey::new(session_secret.into_bytes()),
        session_cookie: session_cookie_name(&env::base_path()),
        keys: Arc::clone(&keys),
        db: Arc::clone(&db),
        clock,
    });

    let containers = Arc::new(PodmanRuntime::new());
    // Filesystem operations are delegated to the out-of-process
    // runner-fs-service; until it is attached, record-only ops stand in.
    let fs = Arc::new(FakeFsOps::new());

    let authorizer =
        Authorizer::new(Arc::new(DbCollaborators::new(Arc::clone(&db))), clock);
    let bus_auth = BusAuth {
        conat_password,
        host_id,
        keys: Arc::clone(&keys),
        secrets: Arc::new(DbProjectSecrets::new(Arc::clone(&db))),
        clock,
    };
    let bus = Arc::new(BusServer::new(bus_auth, authorizer));

    let tracker = WsTracker::new();
    let proxy_state = Arc::new(ProxyState {
        gates: Arc::clone(&gates),
        containers: containers.clone(),
        leases: ContainerLeases::new(containers.clone(), DEFAULT_LEASE_TTL),
        sockets: tracker.clone(),
        bus: Arc::clone(&bus),
        https: env::https_enabled(),
        session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        http: reqwest::Client::new(),
    });

    let addr = env::listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr: addr.clone(), source })?;
    info!(%addr, "listening");
    let router = crate::proxy::router(Arc::clone(&proxy_state));
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            warn!(%e, "listener failed");
        }
    });

    // Revocation sweep over upgraded sockets.
    tokio::spawn(tracker.clone().run_sweep_loop(
        Arc::clone(&gates),
        env::revocation_sweep_interval(),
        shutdown.clone(),
    ));

    // Everything master-facing is optional: a host without
    // COCALC_MASTER_CONAT_SERVER runs standalone (tests, dev).
    if let Some(master_url) = env::master_conat_server() {
        start_master_plane(MasterPlane {
            master_url,
            host_id,
            db,
            secrets,
            keys,
            containers,
            fs,
            bus: Arc::clone(&bus),
            shutdown: shutdown.clone(),
        })
        .await?;
    } else {
        info!("no master configured; running standalone");
    }

    shutdown.cancelled().await;
    info!("shutting down");
    Ok(())
}

struct MasterPlane {
    master_url: String,
    host_id: Uuid,
    db: Arc<Db>,
    secrets: Arc<Secrets>,
    keys: Arc<KeyStore>,
    containers: Arc<PodmanRuntime>,
    fs: Arc<FakeFsOps>,
    bus: Arc<BusServer<SystemClock>>,
    shutdown: CancellationToken,
}

async fn start_master_plane(plane: MasterPlane) -> Result<(), StartupError> {
    let MasterPlane {
        master_url,
        host_id,
        db,
        secrets,
        keys,
        containers,
        fs,
        bus,
        shutdown,
    } = plane;

    // First connection may be tokenless (fresh host): only good enough to
    // call the bootstrap rotation, after which we reconnect authenticated.
    let initial_token =
        secrets.master_token().map_err(|e| StartupError::Secrets(e.to_string()))?;
    let bootstrap_master = BusMaster::connect(&master_url, initial_token.clone())
        .await
        .map_err(|e| StartupError::Master(e.to_string()))?;
    let token = ensure_master_token(&secrets, &bootstrap_master, host_id)
        .await
        .map_err(|e| StartupError::Master(e.to_string()))?;
    let master = Arc::new(
        if initial_token.as_deref() == Some(token.as_str()) {
            bootstrap_master
        } else {
            BusMaster::connect(&master_url, Some(token))
                .await
                .map_err(|e| StartupError::Master(e.to_string()))?
        },
    );

    install_verification_key(master.as_ref(), &keys, &shutdown)
        .await
        .map_err(|e| StartupError::Master(e.to_string()))?;

    let registration = HostRegistration {
        id: host_id,
        name: hostname(),
        region: std::env::var("COCALC_PROJECT_HOST_REGION").unwrap_or_default(),
        public_url: None,
        internal_url: None,
        ssh_server: None,
        sshpiperd_public_key: crate::tunnel::ensure_keypair(
            &secrets.tunnel_key_path(),
            "ssh-keygen",
        )
        .await
        .map_err(|e| StartupError::Master(e.to_string()))?,
        version: env::VERSION.to_string(),
        metadata: serde_json::json!({}),
    };

    tokio::spawn(run_heartbeat(
        Arc::clone(&master) as Arc<dyn MasterApi>,
        registration,
        shutdown.clone(),
    ));
    tokio::spawn(run_token_guard(
        Arc::clone(&secrets),
        Arc::clone(&master) as Arc<dyn MasterApi>,
        host_id,
        shutdown.clone(),
    ));
    tokio::spawn(run_revocation_sync(
        master.client(),
        Arc::clone(&db),
        Arc::clone(&bus),
        shutdown.clone(),
    ));

    // Codex credential cache (the control service and the GC share it).
    let cache = Arc::new(CodexCache::new(
        env::subscriptions_root(),
        Arc::clone(&master) as Arc<dyn crate::creds::CredentialRegistry>,
        containers.clone() as Arc<dyn crate::adapters::ContainerRuntime>,
        env::codex_shared_home_mode(),
        env::codex_cache_ttl(),
        env::codex_cache_sweep(),
        SystemClock,
    ));

    // Control service the master invokes.
    let lro = LroRuntime::new(SystemClock);
    let service = Arc::new(control::control_service(
        Arc::clone(&db),
        containers.clone() as Arc<dyn crate::adapters::ContainerRuntime>,
        fs as Arc<dyn crate::adapters::FsOps>,
        lro,
        Arc::clone(&cache),
        env::codex_login_command(),
        host_id,
    ));
    let control_client = master.client();
    let control_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = service
            .serve(control_client, control::control_subject(host_id), control_shutdown)
            .await
        {
            warn!(%e, "control service stopped");
        }
    });

    // Reverse tunnel.
    let local_http_port = env::listen_addr()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9100);
    let (supervisor, _config) = TunnelSupervisor::new(
        TunnelOptions::new(host_id, secrets.tunnel_key_path(), local_http_port, 22),
        Arc::clone(&master) as Arc<dyn crate::tunnel::TunnelRegistrar>,
        shutdown.clone(),
    );
    tokio::spawn(supervisor.run());

    // Codex credential GC.
    tokio::spawn(cache.run_gc_loop(shutdown));

    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "project-host".to_string())
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
