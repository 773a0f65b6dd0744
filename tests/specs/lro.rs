//! LRO specs: the control service over a real bus, polled with the
//! client-side wait loop.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ph_bus::{BusClient, ClientConfig, RpcService};
use ph_core::SystemClock;
use ph_host::adapters::{FakeContainerRuntime, FakeFsOps};
use ph_host::creds::{CodexCache, FakeRegistry, SharedHomeMode};
use ph_host::master::control::{control_service, control_subject};
use ph_lro::{wait, LroRuntime, OpStatus, OpSummary};

use crate::support::{start_stack, SYSTEM_PASSWORD};

#[tokio::test]
async fn create_project_completes_via_wait() {
    let stack = start_stack().await;

    // The host serves its control service as hub.
    let hub = Arc::new(
        BusClient::connect(ClientConfig {
            url: format!("{}/conat", stack.base_url),
            system_cookie: Some(SYSTEM_PASSWORD.to_string()),
            ..Default::default()
        })
        .await
        .unwrap(),
    );
    let lro = LroRuntime::new(SystemClock);
    let subs_root = tempfile::tempdir().unwrap();
    let creds = Arc::new(CodexCache::new(
        subs_root.path(),
        Arc::new(FakeRegistry::new()),
        Arc::new(FakeContainerRuntime::new()),
        SharedHomeMode::Prefer,
        Duration::from_secs(72 * 3600),
        Duration::from_secs(3600),
        SystemClock,
    ));
    let service = Arc::new(control_service(
        Arc::clone(&stack.db),
        Arc::new(FakeContainerRuntime::new()),
        Arc::new(FakeFsOps::new()),
        lro,
        creds,
        vec!["true".to_string()],
        stack.host_id,
    ));
    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn(service.serve(
        Arc::clone(&hub),
        control_subject(stack.host_id),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The master (another hub connection) submits and polls.
    let master = BusClient::connect(ClientConfig {
        url: format!("{}/conat", stack.base_url),
        system_cookie: Some(SYSTEM_PASSWORD.to_string()),
        ..Default::default()
    })
    .await
    .unwrap();
    let project_id = Uuid::new_v4();
    let submitted = RpcService::call(
        &master,
        &control_subject(stack.host_id),
        "createProject",
        serde_json::json!({ "project_id": project_id, "title": "spec" }),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    let op_id = submitted["op_id"].as_str().unwrap().to_string();

    let outcome = wait(
        || async {
            let raw = RpcService::call(
                &master,
                &control_subject(stack.host_id),
                "lroGet",
                serde_json::json!({ "op_id": op_id }),
                Duration::from_secs(2),
            )
            .await
            .map_err(|e| e.to_string())?;
            serde_json::from_value::<OpSummary>(raw).map_err(|e| e.to_string())
        },
        Duration::from_secs(5),
        Duration::from_millis(100),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, OpStatus::Succeeded);
    assert!(!outcome.timed_out);
    assert!(stack.db.project(project_id).unwrap().is_some());
    shutdown.cancel();
}

#[tokio::test]
async fn wait_times_out_on_a_stuck_operation() {
    let lro = LroRuntime::new(SystemClock);
    let op_id = lro.submit(
        "stuck",
        ph_lro::OpScope::host(Uuid::new_v4()),
        serde_json::Value::Null,
        ph_lro::SubmitOpts::default(),
        Box::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(serde_json::Value::Null)
            })
        }),
    );
    // Let it reach running.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let outcome = wait(
        || async { Ok::<_, String>(lro.get(&op_id).unwrap()) },
        Duration::from_millis(500),
        Duration::from_millis(100),
    )
    .await
    .unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.status, OpStatus::Running);
    // Returns within timeout + one poll interval.
    assert!(started.elapsed() < Duration::from_millis(900));
    lro.cancel(&op_id);
}
