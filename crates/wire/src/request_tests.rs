// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    ping = { Action::Ping, "ping" },
    shutdown = { Action::Shutdown, "shutdown" },
    list = { Action::FileList, "workspace.file.list" },
    cat = { Action::FileCat, "workspace.file.cat" },
    put = { Action::FilePut, "workspace.file.put" },
    get = { Action::FileGet, "workspace.file.get" },
    rm = { Action::FileRm, "workspace.file.rm" },
    mkdir = { Action::FileMkdir, "workspace.file.mkdir" },
    rg = { Action::FileRg, "workspace.file.rg" },
    fd = { Action::FileFd, "workspace.file.fd" },
)]
fn actions_serialize_to_exact_names(action: Action, name: &str) {
    assert_eq!(serde_json::to_string(&action).unwrap(), format!("\"{name}\""));
    assert_eq!(action.as_str(), name);
    let back: Action = serde_json::from_str(&format!("\"{name}\"")).unwrap();
    assert_eq!(back, action);
}

#[test]
fn unknown_action_fails_to_parse() {
    let raw = r#"{"id":1,"action":"workspace.file.chmod"}"#;
    assert!(serde_json::from_str::<Request>(raw).is_err());
}

#[test]
fn optional_fields_are_omitted() {
    let json = serde_json::to_string(&Request::new(7, Action::Ping)).unwrap();
    assert_eq!(json, r#"{"id":7,"action":"ping"}"#);
}

#[test]
fn full_request_round_trips() {
    let request = Request {
        id: 42,
        action: Action::FilePut,
        cwd: Some("/work".into()),
        globals: Some(AuthGlobals {
            profile: Some("dev".into()),
            bearer: Some("tok".into()),
            ..Default::default()
        }),
        payload: Some(serde_json::json!({"path": "a.txt"})),
    };
    let json = serde_json::to_string(&request).unwrap();
    let back: Request = serde_json::from_str(&json).unwrap();
    assert_eq!(back, request);
}
