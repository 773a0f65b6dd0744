//! Shared fixture: a full host stack (proxy router + bus server + store)
//! on ephemeral listeners, with a test-side signing key playing the
//! master's role.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use uuid::Uuid;

use ph_auth::acl::Authorizer;
use ph_auth::token::{sign_for_tests, RoutedClaims};
use ph_auth::{KeyStore, SessionKey};
use ph_bus::{BusAuth, BusServer};
use ph_core::SystemClock;
use ph_host::adapters::FakeContainerRuntime;
use ph_host::leases::ContainerLeases;
use ph_host::lifecycle::{DbCollaborators, DbProjectSecrets};
use ph_host::proxy::{router, AuthGates, ProxyState, WsTracker};
use ph_store::{Db, ProjectRow, ProjectUser};

pub const SYSTEM_PASSWORD: &str = "spec-conat-password";

pub struct Stack {
    pub base_url: String,
    pub gates: Arc<AuthGates<SystemClock>>,
    pub db: Arc<Db>,
    pub bus: Arc<BusServer<SystemClock>>,
    pub containers: Arc<FakeContainerRuntime>,
    pub tracker: WsTracker,
    pub signing: SigningKey,
    pub host_id: Uuid,
}

impl Stack {
    /// Mint a routed bearer for `account_id` on `project_id`, valid 10 min.
    pub fn bearer(&self, account_id: Uuid, project_id: Uuid) -> String {
        let now = now_secs();
        sign_for_tests(
            &self.signing,
            &RoutedClaims {
                sub: account_id.to_string(),
                aud: self.host_id,
                act: "account".into(),
                iat: now,
                exp: now + 600,
                project_id,
            },
        )
    }

    /// Add a collaborator project row.
    pub fn add_project(&self, project_id: Uuid, collaborator: Uuid) {
        let mut row = ProjectRow::new(project_id, "spec project");
        row.users.insert(collaborator, ProjectUser { group: "collaborator".into() });
        self.db.upsert_project(&row).unwrap();
    }
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub async fn start_stack() -> Stack {
    let signing = SigningKey::generate(&mut OsRng);
    let keys = Arc::new(KeyStore::new());
    keys.install(signing.verifying_key());
    let host_id = Uuid::new_v4();
    let db = Arc::new(Db::open_in_memory().unwrap());
    let clock = SystemClock;

    let gates = Arc::new(AuthGates {
        host_id,
        session_key: SessionKey::new(*b"spec-session-key-spec-session-ke"),
        session_cookie: ph_auth::session_cookie_name(""),
        keys: Arc::clone(&keys),
        db: Arc::clone(&db),
        clock,
    });

    let bus = Arc::new(BusServer::new(
        BusAuth {
            conat_password: SYSTEM_PASSWORD.to_string(),
            host_id,
            keys,
            secrets: Arc::new(DbProjectSecrets::new(Arc::clone(&db))),
            clock,
        },
        Authorizer::new(Arc::new(DbCollaborators::new(Arc::clone(&db))), clock),
    ));

    let containers = Arc::new(FakeContainerRuntime::new());
    let tracker = WsTracker::new();
    let state = Arc::new(ProxyState {
        gates: Arc::clone(&gates),
        containers: containers.clone(),
        leases: ContainerLeases::new(
            containers.clone(),
            std::time::Duration::from_secs(60),
        ),
        sockets: tracker.clone(),
        bus: Arc::clone(&bus),
        https: false,
        session_ttl_secs: 3600,
        http: reqwest::Client::new(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });

    Stack { base_url, gates, db, bus, containers, tracker, signing, host_id }
}

/// A plain HTTP upstream answering 200 with a fixed body; returns its
/// address.
pub async fn start_upstream(body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let app = axum::Router::new().fallback(move || async move { body });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A websocket echo upstream; returns its address.
pub async fn start_ws_echo() -> String {
    use futures_util::{SinkExt, StreamExt};
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    addr
}
