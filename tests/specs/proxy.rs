//! Proxy specs: token→cookie upgrade, query-param stripping, and the
//! revocation kick over live sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use ph_auth::{AUTH_QUERY_PARAM, SESSION_COOKIE};
use ph_store::AccountRevocation;

use crate::support::{now_ms, start_stack, start_upstream, start_ws_echo};

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn token_query_param_upgrades_to_session_cookie() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);
    let upstream = start_upstream("workspace says hi").await;
    stack.containers.set_upstream(project, 3000, upstream.clone());

    let token = stack.bearer(account, project);
    let url =
        format!("{}/{project}/proxy/3000/?{AUTH_QUERY_PARAM}={token}", stack.base_url);
    let response = no_redirect_client().get(&url).send().await.unwrap();

    // 302 back to the same URL with the parameter removed.
    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers()["location"].to_str().unwrap(),
        format!("/{project}/proxy/3000/")
    );
    let set_cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE}=")), "{set_cookie}");
    assert!(set_cookie.contains("HttpOnly"), "{set_cookie}");
    assert!(set_cookie.contains("SameSite=Lax"), "{set_cookie}");
    assert!(!set_cookie.contains("Secure"), "{set_cookie}");

    // The cookie alone now authorizes the clean URL.
    let cookie_pair = set_cookie.split(';').next().unwrap().to_string();
    let response = no_redirect_client()
        .get(format!("{}/{project}/proxy/3000/", stack.base_url))
        .header("cookie", &cookie_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "workspace says hi");
}

#[tokio::test]
async fn bearer_header_also_issues_a_cookie_without_redirecting() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);
    let upstream = start_upstream("ok").await;
    stack.containers.set_upstream(project, 8080, upstream.clone());

    let response = no_redirect_client()
        .get(format!("{}/{project}/proxy/8080/index.html", stack.base_url))
        .header("authorization", format!("Bearer {}", stack.bearer(account, project)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("set-cookie"));
}

#[tokio::test]
async fn missing_and_foreign_credentials_are_rejected() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);

    // No credentials: 401.
    let response = no_redirect_client()
        .get(format!("{}/{project}/proxy/3000/", stack.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Valid token for a non-collaborator: 403.
    let stranger = Uuid::new_v4();
    let response = no_redirect_client()
        .get(format!("{}/{project}/proxy/3000/", stack.base_url))
        .header("authorization", format!("Bearer {}", stack.bearer(stranger, project)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn post_strips_the_token_param_in_place() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);
    let upstream = start_upstream("posted").await;
    stack.containers.set_upstream(project, 5000, upstream.clone());

    let token = stack.bearer(account, project);
    let url = format!(
        "{}/{project}/proxy/5000/submit?{AUTH_QUERY_PARAM}={token}&keep=1",
        stack.base_url
    );
    let response =
        no_redirect_client().post(&url).body("the body").send().await.unwrap();
    // Forwarded (not redirected), body preserved by the upstream answering.
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "posted");
}

#[tokio::test]
async fn revocation_kicks_live_websockets_and_denies_sessions() {
    let stack = start_stack().await;
    let account = Uuid::new_v4();
    let project = Uuid::new_v4();
    stack.add_project(project, account);
    let ws_upstream = start_ws_echo().await;
    stack.containers.set_upstream(project, 7000, ws_upstream.clone());

    // Upgrade a websocket through the proxy using a bearer token.
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::Message;
    let ws_url = format!(
        "ws{}/{project}/proxy/7000/sock",
        stack.base_url.strip_prefix("http").unwrap()
    );
    let mut request = ws_url.into_client_request().unwrap();
    let token = stack.bearer(account, project);
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    // Echo works while the account is in good standing.
    ws.send(Message::text("hello")).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hello");
    assert_eq!(stack.tracker.len(), 1);

    // Revoke everything issued up to now, then sweep.
    stack
        .db
        .apply_revocation(AccountRevocation {
            account_id: account,
            revoked_before_ms: now_ms() + 1000,
            updated_ms: now_ms(),
        })
        .unwrap();
    assert_eq!(stack.tracker.sweep(&stack.gates), 1);

    // The socket observes the close.
    let mut closed = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_millis(100), ws.next()).await {
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {
                closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(closed, "websocket was not closed by the sweep");

    // Subsequent HTTP requests with a revoked-era session get 401 and the
    // cookie cleared.
    let session =
        stack.gates.session_key.issue(account, 3600, &stack.gates.clock);
    let response = no_redirect_client()
        .get(format!("{}/{project}/proxy/7000/", stack.base_url))
        .header("cookie", format!("{SESSION_COOKIE}={session}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let cleared = response.headers()["set-cookie"].to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"), "{cleared}");
}
