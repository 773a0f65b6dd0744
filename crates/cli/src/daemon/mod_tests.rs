// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;

use ph_wire::read_frame_timeout;

struct FakeExecutor {
    requests: Mutex<Vec<Request>>,
    result: Mutex<Result<serde_json::Value, OpFailure>>,
}

impl FakeExecutor {
    fn ok(value: serde_json::Value) -> Arc<Self> {
        Arc::new(Self { requests: Mutex::new(Vec::new()), result: Mutex::new(Ok(value)) })
    }

    fn failing(failure: OpFailure) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            result: Mutex::new(Err(failure)),
        })
    }
}

#[async_trait]
impl ActionExecutor for FakeExecutor {
    async fn execute(&self, request: &Request) -> Result<serde_json::Value, OpFailure> {
        self.requests.lock().push(request.clone());
        self.result.lock().clone()
    }
}

async fn roundtrip(
    executor: Arc<dyn ActionExecutor>,
    requests: Vec<Request>,
) -> (Vec<Response>, CancellationToken) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let shutdown = CancellationToken::new();
    let (server_read, server_write) = tokio::io::split(server);
    let task_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        handle_connection(server_read, server_write, executor, task_shutdown).await;
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut client_read = BufReader::new(client_read);
    let mut responses = Vec::new();
    for request in &requests {
        write_frame(&mut client_write, request).await.unwrap();
        let response: Response =
            read_frame_timeout(&mut client_read, std::time::Duration::from_secs(2))
                .await
                .unwrap();
        responses.push(response);
    }
    drop(client_write);
    let _ = server_task.await;
    (responses, shutdown)
}

#[tokio::test]
async fn ping_answers_with_version_meta() {
    let executor = FakeExecutor::ok(serde_json::Value::Null);
    let (responses, _) = roundtrip(executor.clone(), vec![Request::new(7, Action::Ping)]).await;
    let response = &responses[0];
    assert!(response.ok);
    assert_eq!(response.id, 7);
    assert_eq!(response.data, Some(serde_json::json!({ "pong": true })));
    assert_eq!(
        response.meta.as_ref().unwrap().version.as_deref(),
        Some(DAEMON_VERSION)
    );
    // Ping never reaches the executor.
    assert!(executor.requests.lock().is_empty());
}

#[tokio::test]
async fn file_actions_are_delegated() {
    let executor = FakeExecutor::ok(serde_json::json!({ "entries": [] }));
    let mut request = Request::new(3, Action::FileList);
    request.payload = Some(serde_json::json!({ "path": "." }));
    let (responses, _) = roundtrip(executor.clone(), vec![request.clone()]).await;

    assert!(responses[0].ok);
    assert_eq!(responses[0].data, Some(serde_json::json!({ "entries": [] })));
    assert_eq!(executor.requests.lock().as_slice(), [request]);
}

#[tokio::test]
async fn failures_carry_message_and_code() {
    let executor =
        FakeExecutor::failing(OpFailure::with_code("nope", "auth.denied"));
    let (responses, _) =
        roundtrip(executor, vec![Request::new(4, Action::FileCat)]).await;
    let response = &responses[0];
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("nope"));
    assert_eq!(response.meta.as_ref().unwrap().code.as_deref(), Some("auth.denied"));
}

#[tokio::test]
async fn many_requests_share_one_connection() {
    let executor = FakeExecutor::ok(serde_json::Value::Null);
    let requests: Vec<Request> = (0..5).map(|id| Request::new(id, Action::Ping)).collect();
    let (responses, _) = roundtrip(executor, requests).await;
    let ids: Vec<u64> = responses.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn shutdown_cancels_the_daemon_token() {
    let executor = FakeExecutor::ok(serde_json::Value::Null);
    let (responses, shutdown) =
        roundtrip(executor, vec![Request::new(1, Action::Shutdown)]).await;
    assert!(responses[0].ok);
    assert_eq!(responses[0].data, Some(serde_json::json!({ "stopping": true })));
    assert!(shutdown.is_cancelled());
}

#[tokio::test]
async fn daemon_end_to_end_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let paths = crate::paths::DaemonPaths::for_uid(dir.path(), 1);
    let executor = FakeExecutor::ok(serde_json::Value::Null);
    let run_paths = paths.clone();
    let task = tokio::spawn(async move { run(&run_paths, executor).await });

    // Wait for the socket to appear, then ping and shut down.
    for _ in 0..100 {
        if paths.socket.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let stream = tokio::net::UnixStream::connect(&paths.socket).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);

    write_frame(&mut write, &Request::new(1, Action::Ping)).await.unwrap();
    let pong: Response =
        read_frame_timeout(&mut read, std::time::Duration::from_secs(2)).await.unwrap();
    assert!(pong.ok);
    assert!(paths.pid_file.exists());

    write_frame(&mut write, &Request::new(2, Action::Shutdown)).await.unwrap();
    let stopping: Response =
        read_frame_timeout(&mut read, std::time::Duration::from_secs(2)).await.unwrap();
    assert!(stopping.ok);

    tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!paths.socket.exists());
    assert!(!paths.pid_file.exists());
}
