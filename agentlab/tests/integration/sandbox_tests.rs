use axum::http::Method;
use serde_json::json;

use crate::common::{
    CliHome, MockDaemon, assert_contains, assert_exit, assert_not_contains, init_test_logging,
    json_error, stderr_of, stdout_of,
};

#[tokio::test]
async fn test_stop_all_reports_each_outcome() {
    init_test_logging();
    crate::test_log!("TEST START: test_stop_all_reports_each_outcome");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::POST,
        "/v1/sandboxes/stop_all",
        200,
        json!({
            "total": 3,
            "stopped": 1,
            "skipped": 1,
            "failed": 1,
            "results": [
                {"vmid": 9001, "result": "stopped"},
                {"vmid": 9002, "result": "skipped", "state": "STOPPED"},
                {"vmid": 9003, "result": "failed", "error": "qm stop timed out"}
            ]
        }),
    );

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["sandbox", "stop", "--all", "--force"])
        .await;
    assert!(output.status.success(), "stop --all failed");

    let calls = daemon.requests_to(Method::POST, "/v1/sandboxes/stop_all");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, json!({"force": true}));

    let stdout = stdout_of(&output);
    assert_contains(&stdout, "stop-all complete");
    assert_contains(&stdout, "stopped=1 skipped=1 failed=1");
    assert_contains(&stdout, "skipped: vmid=9002");
    assert_contains(&stdout, "failed: vmid=9003");
    crate::test_log!("TEST PASS: test_stop_all_reports_each_outcome");
}

#[tokio::test]
async fn test_expose_with_force_sends_exposure() {
    init_test_logging();
    crate::test_log!("TEST START: test_expose_with_force_sends_exposure");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::POST,
        "/v1/exposures",
        201,
        json!({
            "name": "sbx-9001-8080",
            "vmid": 9001,
            "port": 8080,
            "target_ip": "10.77.0.12",
            "url": "https://pve.tailnet.ts.net:8080",
            "state": "serving"
        }),
    );

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["sandbox", "expose", "9001", ":8080", "--force"])
        .await;
    assert!(output.status.success(), "expose failed");

    let calls = daemon.requests_to(Method::POST, "/v1/exposures");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].body,
        json!({"name": "sbx-9001-8080", "vmid": 9001, "port": 8080, "force": true})
    );
    assert_contains(&stdout_of(&output), "sbx-9001-8080");
    crate::test_log!("TEST PASS: test_expose_with_force_sends_exposure");
}

#[tokio::test]
async fn test_destructive_op_refused_in_json_mode() {
    init_test_logging();
    crate::test_log!("TEST START: test_destructive_op_refused_in_json_mode");

    let daemon = MockDaemon::start().await;
    let home = CliHome::new();
    let mut args = vec!["--endpoint", daemon.endpoint.as_str(), "--json"];
    args.extend_from_slice(&["sandbox", "destroy", "9001"]);
    let output = home.run(&args).await;

    assert_exit(&output, 1);
    let body = json_error(&output);
    assert_contains(body["error"].as_str().unwrap_or_default(), "9001");
    assert!(daemon.requests().is_empty(), "no request may reach the daemon");
    crate::test_log!("TEST PASS: test_destructive_op_refused_in_json_mode");
}

#[tokio::test]
async fn test_missing_sandbox_lists_nearby_vmids() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_sandbox_lists_nearby_vmids");

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
    let output = home.run_against(&daemon, &["sandbox", "show", "9010"]).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert_contains(&stderr, "9010");
    assert_contains(&stderr, "9011");
    crate::test_log!("TEST PASS: test_missing_sandbox_lists_nearby_vmids");
}

#[tokio::test]
async fn test_token_never_reaches_stderr() {
    init_test_logging();
    crate::test_log!("TEST START: test_token_never_reaches_stderr");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::GET,
        "/v1/sandboxes",
        500,
        json!({"error": "rejected credential t0ken-abc"}),
    );

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["--verbose", "sandbox", "list"])
        .await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert_contains(&stderr, "rejected credential");
    assert_not_contains(&stderr, "t0ken-abc");
    assert_not_contains(&stdout_of(&output), "t0ken-abc");
    crate::test_log!("TEST PASS: test_token_never_reaches_stderr");
}
