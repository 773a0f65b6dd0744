//! Bus specs over the shared listener: `/conat` upgrade, identity
//! scoping, and an account↔project RPC round trip.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ph_bus::{BusClient, BusError, ClientConfig, RpcService};

use crate::support::{start_stack, SYSTEM_PASSWORD};

fn conat_url(base_url: &str) -> String {
    format!("{base_url}/conat")
}

#[tokio::test]
async fn hub_signs_in_over_the_proxy_listener() {
    let stack = start_stack().await;
    let client = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        system_cookie: Some(SYSTEM_PASSWORD.to_string()),
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(client.identity().is_hub());
    assert_eq!(stack.bus.connection_count(), 1);
}

#[tokio::test]
async fn bad_credentials_close_with_a_typed_error() {
    let stack = start_stack().await;
    let result = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        system_cookie: Some("wrong".to_string()),
        ..Default::default()
    })
    .await;
    assert!(matches!(result, Err(BusError::Auth(_))), "{result:?}");
}

#[tokio::test]
async fn collaborator_account_reaches_the_project_file_service() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);
    let secret = stack.db.project_secret(project).unwrap();

    // The workspace process signs in with its project secret and serves a
    // file RPC.
    let project_client = Arc::new(
        BusClient::connect(ClientConfig {
            url: conat_url(&stack.base_url),
            project: Some((project, secret)),
            ..Default::default()
        })
        .await
        .unwrap(),
    );
    let service = Arc::new(RpcService::new().method("list", |_args| {
        Box::pin(async move {
            Ok(serde_json::json!({ "entries": [
                { "name": "README.md", "size": 12, "mtime_ms": 0, "is_dir": false }
            ]}))
        })
    }));
    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn(service.serve(
        Arc::clone(&project_client),
        format!("project.{project}.fs"),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The collaborator calls it through a routed bearer connection.
    let account_client = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        bearer: Some(stack.bearer(account, project)),
        ..Default::default()
    })
    .await
    .unwrap();
    let result = RpcService::call(
        &account_client,
        &format!("project.{project}.fs"),
        "list",
        serde_json::json!({ "path": "." }),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert_eq!(result["entries"][0]["name"], "README.md");

    // A stranger with a valid token but no membership is denied.
    let stranger = Uuid::new_v4();
    let stranger_client = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        bearer: Some(stack.bearer(stranger, project)),
        ..Default::default()
    })
    .await
    .unwrap();
    let result = RpcService::call(
        &stranger_client,
        &format!("project.{project}.fs"),
        "list",
        serde_json::Value::Null,
        Duration::from_secs(2),
    )
    .await;
    assert!(matches!(result, Err(BusError::Denied(_))), "{result:?}");
    shutdown.cancel();
}

#[tokio::test]
async fn revocation_broadcast_persists_and_kicks_bus_connections() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);

    // A live account connection that the revocation must close.
    let victim = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        bearer: Some(stack.bearer(account, project)),
        ..Default::default()
    })
    .await
    .unwrap();

    // The sync loop listens on a hub connection of the same bus.
    let listener = Arc::new(
        BusClient::connect(ClientConfig {
            url: conat_url(&stack.base_url),
            system_cookie: Some(SYSTEM_PASSWORD.to_string()),
            ..Default::default()
        })
        .await
        .unwrap(),
    );
    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn(ph_host::lifecycle::run_revocation_sync(
        Arc::clone(&listener),
        Arc::clone(&stack.db),
        Arc::clone(&stack.bus),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The master broadcasts a revocation covering the victim's session.
    let broadcaster = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        system_cookie: Some(SYSTEM_PASSWORD.to_string()),
        ..Default::default()
    })
    .await
    .unwrap();
    let now_ms = crate::support::now_ms();
    broadcaster
        .publish(
            "hub.revocations",
            serde_json::json!({
                "account_id": account,
                "revoked_before_ms": now_ms + 1000,
                "updated_ms": now_ms,
            }),
        )
        .unwrap();

    // Persisted and kicked.
    let mut persisted = false;
    let mut kicked = false;
    for _ in 0..100 {
        persisted = stack.db.revocation(account).unwrap().is_some();
        kicked = victim.is_closed();
        if persisted && kicked {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(persisted, "revocation never persisted");
    assert!(kicked, "revoked account's bus connection never closed");
    shutdown.cancel();
}

#[tokio::test]
async fn wrong_project_secret_cannot_sign_in() {
    let stack = start_stack().await;
    let project = Uuid::new_v4();
    stack.add_project(project, Uuid::new_v4());
    let result = BusClient::connect(ClientConfig {
        url: conat_url(&stack.base_url),
        project: Some((project, "guessed".to_string())),
        ..Default::default()
    })
    .await;
    assert!(matches!(result, Err(BusError::Auth(_))), "{result:?}");
}
