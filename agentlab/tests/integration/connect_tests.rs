use axum::http::Method;
use serde_json::{Value, json};

use crate::common::{
    CliHome, MockDaemon, assert_contains, assert_path_exists, init_test_logging, stdout_of,
};

fn status_body() -> Value {
    json!({
        "version": "0.4.0",
        "sandboxes": {"RUNNING": 2},
        "jobs": {"QUEUED": 1}
    })
}

#[tokio::test]
async fn test_connect_saves_credentials_used_by_later_commands() {
    init_test_logging();
    crate::test_log!("TEST START: test_connect_saves_credentials_used_by_later_commands");

    let daemon = MockDaemon::start().await;
    daemon.on(Method::GET, "/v1/status", 200, status_body());

    let home = CliHome::new();
    let output = home
        .run(&[
            "connect",
            "--endpoint",
            &format!("{}/", daemon.endpoint),
            "--token",
            "saved-secret",
            "--jump-host",
            "pve.tailnet.ts.net",
        ])
        .await;
    assert!(output.status.success(), "connect failed");
    assert_contains(&stdout_of(&output), "connected to");

    let path = home.config_path();
    assert_path_exists(&path);
    let saved: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(saved["endpoint"], daemon.endpoint.as_str());
    assert_eq!(saved["token"], "saved-secret");
    assert_eq!(saved["jump_host"], "pve.tailnet.ts.net");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    let output = home.run(&["status"]).await;
    assert!(output.status.success(), "status with saved credentials failed");
    let calls = daemon.requests_to(Method::GET, "/v1/status");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].authorization.as_deref(), Some("Bearer saved-secret"));
    assert_contains(&stdout_of(&output), "0.4.0");
    crate::test_log!("TEST PASS: test_connect_saves_credentials_used_by_later_commands");
}

#[tokio::test]
async fn test_connect_does_not_save_unreachable_endpoint() {
    init_test_logging();
    crate::test_log!("TEST START: test_connect_does_not_save_unreachable_endpoint");

    let home = CliHome::new();
    let output = home
        .run(&[
            "--timeout",
            "2s",
            "connect",
            "--endpoint",
            "http://127.0.0.1:1",
            "--token",
            "nope",
        ])
        .await;

    assert_eq!(output.status.code(), Some(1));
    assert!(!home.config_path().exists());
    crate::test_log!("TEST PASS: test_connect_does_not_save_unreachable_endpoint");
}

#[tokio::test]
async fn test_connect_rejects_endpoint_with_path() {
    init_test_logging();
    crate::test_log!("TEST START: test_connect_rejects_endpoint_with_path");

    let home = CliHome::new();
    let output = home
        .run(&["connect", "--endpoint", "http://host:8845/api"])
        .await;

    assert_eq!(output.status.code(), Some(2));
    assert!(!home.config_path().exists());
    crate::test_log!("TEST PASS: test_connect_rejects_endpoint_with_path");
}

#[tokio::test]
async fn test_disconnect_removes_saved_credentials() {
    init_test_logging();
    crate::test_log!("TEST START: test_disconnect_removes_saved_credentials");

    let home = CliHome::new();
    let path = home.config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"endpoint":"http://pve:8845","token":"x"}"#).unwrap();

    let output = home.run(&["--json", "disconnect"]).await;
    assert!(output.status.success(), "disconnect failed");
    let body: Value = serde_json::from_str(stdout_of(&output).trim()).unwrap();
    assert_eq!(body["removed"], true);
    assert!(!path.exists());

    let output = home.run(&["--json", "disconnect"]).await;
    assert!(output.status.success(), "second disconnect failed");
    let body: Value = serde_json::from_str(stdout_of(&output).trim()).unwrap();
    assert_eq!(body["removed"], false);
    crate::test_log!("TEST PASS: test_disconnect_removes_saved_credentials");
}
