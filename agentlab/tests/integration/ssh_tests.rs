use axum::http::Method;
use serde_json::json;

use crate::common::{
    CliHome, MockDaemon, assert_contains, assert_exit, assert_ssh_command, init_test_logging,
    json_error, stderr_of, stdout_of,
};

fn sandbox(state: &str, ip: &str) -> serde_json::Value {
    json!({"vmid": 9001, "name": "sbx-9001", "profile": "yolo", "state": state, "ip": ip})
}

#[tokio::test]
async fn test_ssh_prints_command_for_running_sandbox() {
    init_test_logging();
    crate::test_log!("TEST START: test_ssh_prints_command_for_running_sandbox");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::GET,
        "/v1/sandboxes/9001",
        200,
        sandbox("RUNNING", "203.0.113.10"),
    );

    let home = CliHome::new();
    let output = home.run_against(&daemon, &["ssh", "9001"]).await;

    assert_exit(&output, 0);
    assert_ssh_command(&output, "agent", "203.0.113.10");
    assert!(daemon.requests_to(Method::POST, "/v1/sandboxes/9001/start").is_empty());
    crate::test_log!("TEST PASS: test_ssh_prints_command_for_running_sandbox");
}

#[tokio::test]
async fn test_ssh_starts_stopped_sandbox_and_waits_for_ip() {
    init_test_logging();
    crate::test_log!("TEST START: test_ssh_starts_stopped_sandbox_and_waits_for_ip");

    let daemon = MockDaemon::start().await;
    daemon
        .on_sequence(
            Method::GET,
            "/v1/sandboxes/9001",
            vec![sandbox("STOPPED", ""), sandbox("RUNNING", "203.0.113.10")],
        )
        .on(
            Method::POST,
            "/v1/sandboxes/9001/start",
            200,
            sandbox("BOOTING", ""),
        );

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["--timeout", "20s", "ssh", "9001"])
        .await;

    assert_exit(&output, 0);
    assert_ssh_command(&output, "agent", "203.0.113.10");

    let order: Vec<String> = daemon
        .requests()
        .iter()
        .map(|r| format!("{} {}", r.method, r.path))
        .collect();
    assert_eq!(
        order,
        vec![
            "GET /v1/sandboxes/9001",
            "POST /v1/sandboxes/9001/start",
            "GET /v1/sandboxes/9001",
        ]
    );
    crate::test_log!("TEST PASS: test_ssh_starts_stopped_sandbox_and_waits_for_ip");
}

#[tokio::test]
async fn test_ssh_times_out_while_sandbox_has_no_ip() {
    init_test_logging();
    crate::test_log!("TEST START: test_ssh_times_out_while_sandbox_has_no_ip");

    let daemon = MockDaemon::start().await;
    daemon.on(Method::GET, "/v1/sandboxes/9001", 200, sandbox("RUNNING", ""));

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["--timeout", "3s", "ssh", "9001"])
        .await;

    assert_exit(&output, 1);
    assert_eq!(stdout_of(&output), "");
    let stderr = stderr_of(&output);
    assert_contains(&stderr, "timed out waiting for sandbox 9001 IP");
    assert_contains(&stderr, "no IP yet");
    crate::test_log!("TEST PASS: test_ssh_times_out_while_sandbox_has_no_ip");
}

#[tokio::test]
async fn test_ssh_no_start_refuses_stopped_sandbox() {
    init_test_logging();
    crate::test_log!("TEST START: test_ssh_no_start_refuses_stopped_sandbox");

    let daemon = MockDaemon::start().await;
    daemon.on(Method::GET, "/v1/sandboxes/9001", 200, sandbox("STOPPED", ""));

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["--json", "ssh", "9001", "--no-start"])
        .await;

    assert_exit(&output, 1);
    let body = json_error(&output);
    assert_eq!(body["error"], "sandbox 9001 is STOPPED");
    assert!(daemon.requests_to(Method::POST, "/v1/sandboxes/9001/start").is_empty());
    crate::test_log!("TEST PASS: test_ssh_no_start_refuses_stopped_sandbox");
}

#[tokio::test]
async fn test_ssh_unknown_sandbox_lists_nearby_vmids_once() {
    init_test_logging();
    crate::test_log!("TEST START: test_ssh_unknown_sandbox_lists_nearby_vmids_once");

    let daemon = MockDaemon::start().await;
    daemon
        .on(
            Method::GET,
            "/v1/sandboxes/9010",
            404,
            json!({"error": "sandbox not found"}),
        )
        .on(
            Method::GET,
            "/v1/sandboxes",
            200,
            json!({"sandboxes": [
                {"vmid": 9001, "state": "RUNNING"},
                {"vmid": 9011, "state": "STOPPED"}
            ]}),
        );

    let home = CliHome::new();
    let output = home.run_against(&daemon, &["ssh", "9010"]).await;

    assert_exit(&output, 1);
    let stderr = stderr_of(&output);
    assert_contains(&stderr, "Error: sandbox 9010 not found");
    assert_contains(&stderr, "closest VMIDs: 9011, 9001");
    assert_eq!(daemon.requests_to(Method::GET, "/v1/sandboxes").len(), 1);
    crate::test_log!("TEST PASS: test_ssh_unknown_sandbox_lists_nearby_vmids_once");
}
