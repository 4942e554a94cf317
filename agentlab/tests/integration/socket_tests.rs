use axum::http::Method;
use serde_json::json;

use crate::common::{CliHome, MockDaemon, assert_contains, init_test_logging, stdout_of};

#[tokio::test]
async fn test_status_over_unix_socket_sends_no_token() {
    init_test_logging();
    crate::test_log!("TEST START: test_status_over_unix_socket_sends_no_token");

    let home = CliHome::new();
    let socket = home.path().join("agentlabd.sock");
    let daemon = MockDaemon::start_unix(&socket).await;
    daemon
        .on(
            Method::GET,
            "/v1/status",
            200,
            json!({"version": "0.4.0", "sandboxes": {}, "jobs": {}}),
        )
        .on(
            Method::GET,
            "/v1/host",
            200,
            json!({"hostname": "pve", "agent_subnet": "10.77.0.0/16"}),
        );

    let socket_arg = socket.display().to_string();
    let output = home.run(&["--socket", &socket_arg, "status"]).await;
    assert!(output.status.success(), "status over socket failed");

    let stdout = stdout_of(&output);
    assert_contains(&stdout, "0.4.0");
    assert_contains(&stdout, "pve");
    let calls = daemon.requests_to(Method::GET, "/v1/status");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].authorization, None);
    crate::test_log!("TEST PASS: test_status_over_unix_socket_sends_no_token");
}

#[tokio::test]
async fn test_logs_tail_prints_events() {
    init_test_logging();
    crate::test_log!("TEST START: test_logs_tail_prints_events");

    let home = CliHome::new();
    let socket = home.path().join("agentlabd.sock");
    let daemon = MockDaemon::start_unix(&socket).await;
    daemon.on(
        Method::GET,
        "/v1/sandboxes/9001/events",
        200,
        json!({
            "events": [
                {"id": 4, "timestamp": "2026-01-02T03:04:05Z", "kind": "sandbox.start", "message": "booted"},
                {"id": 5, "timestamp": "2026-01-02T03:04:09Z", "kind": "sandbox.ready", "message": "ssh up"}
            ],
            "last_id": 5
        }),
    );

    let socket_arg = socket.display().to_string();
    let output = home
        .run(&["--socket", &socket_arg, "logs", "9001", "--tail", "2"])
        .await;
    assert!(output.status.success(), "logs failed");

    let stdout = stdout_of(&output);
    assert_contains(&stdout, "booted");
    assert_contains(&stdout, "ssh up");
    crate::test_log!("TEST PASS: test_logs_tail_prints_events");
}
