use axum::http::Method;
use serde_json::json;

use crate::common::{
    CliHome, MockDaemon, assert_contains, assert_path_exists, init_test_logging, stdout_of,
};

#[tokio::test]
async fn test_job_run_with_branch_creates_session_first() {
    init_test_logging();
    crate::test_log!("TEST START: test_job_run_with_branch_creates_session_first");

    let daemon = MockDaemon::start().await;
    daemon
        .on(
            Method::GET,
            "/v1/sessions/branch-feature-login",
            404,
            json!({"error": "session not found"}),
        )
        .on(
            Method::POST,
            "/v1/sessions",
            201,
            json!({
                "id": "sess-42",
                "name": "branch-feature-login",
                "workspace_id": "ws-7",
                "profile": "yolo",
                "branch": "feature/login"
            }),
        )
        .on(
            Method::POST,
            "/v1/jobs",
            201,
            json!({
                "id": "job-1",
                "repo_url": "https://github.com/org/repo",
                "profile": "yolo",
                "task": "run",
                "status": "QUEUED",
                "workspace_id": "ws-7",
                "session_id": "sess-42"
            }),
        );

    let home = CliHome::new();
    let output = home
        .run_against(
            &daemon,
            &[
                "job",
                "run",
                "--repo",
                "https://github.com/org/repo",
                "--profile",
                "yolo",
                "--task",
                "run",
                "--branch",
                "feature/login",
            ],
        )
        .await;
    assert!(output.status.success(), "job run failed");

    let sessions = daemon.requests_to(Method::POST, "/v1/sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(
        sessions[0].body,
        json!({
            "name": "branch-feature-login",
            "profile": "yolo",
            "branch": "feature/login",
            "workspace_create": {
                "name": "branch-feature-login",
                "size_gb": 80,
                "storage": "local-zfs"
            }
        })
    );

    let jobs = daemon.requests_to(Method::POST, "/v1/jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].body["workspace_id"], "ws-7");
    assert_eq!(jobs[0].body["session_id"], "sess-42");
    assert_eq!(jobs[0].authorization.as_deref(), Some("Bearer t0ken-abc"));

    let order: Vec<String> = daemon
        .requests()
        .iter()
        .map(|r| format!("{} {}", r.method, r.path))
        .collect();
    assert_eq!(
        order,
        vec![
            "GET /v1/sessions/branch-feature-login",
            "POST /v1/sessions",
            "POST /v1/jobs",
        ]
    );
    assert_contains(&stdout_of(&output), "job-1");
    crate::test_log!("TEST PASS: test_job_run_with_branch_creates_session_first");
}

#[tokio::test]
async fn test_job_run_reuses_existing_branch_session() {
    init_test_logging();
    crate::test_log!("TEST START: test_job_run_reuses_existing_branch_session");

    let daemon = MockDaemon::start().await;
    daemon
        .on(
            Method::GET,
            "/v1/sessions/branch-main",
            200,
            json!({"id": "sess-1", "name": "branch-main", "workspace_id": "ws-1", "profile": "yolo"}),
        )
        .on(
            Method::POST,
            "/v1/jobs",
            201,
            json!({"id": "job-2", "status": "QUEUED"}),
        );

    let home = CliHome::new();
    let output = home
        .run_against(
            &daemon,
            &[
                "job", "run", "--repo", "https://github.com/org/repo", "--profile", "yolo",
                "--task", "run", "--branch", "main",
            ],
        )
        .await;
    assert!(output.status.success(), "job run failed");

    assert!(daemon.requests_to(Method::POST, "/v1/sessions").is_empty());
    let jobs = daemon.requests_to(Method::POST, "/v1/jobs");
    assert_eq!(jobs[0].body["session_id"], "sess-1");
    assert_eq!(jobs[0].body["workspace_id"], "ws-1");
    crate::test_log!("TEST PASS: test_job_run_reuses_existing_branch_session");
}

#[tokio::test]
async fn test_artifact_download_defaults_to_bundle() {
    init_test_logging();
    crate::test_log!("TEST START: test_artifact_download_defaults_to_bundle");

    let daemon = MockDaemon::start().await;
    daemon
        .on(
            Method::GET,
            "/v1/jobs/job-9/artifacts",
            200,
            json!({
                "job_id": "job-9",
                "artifacts": [
                    {"name": "agentlab-artifacts.tar.gz", "path": "out/agentlab-artifacts.tar.gz", "size_bytes": 11},
                    {"name": "report.md", "path": "out/report.md", "size_bytes": 4}
                ]
            }),
        )
        .on_bytes(
            Method::GET,
            "/v1/jobs/job-9/artifacts/download",
            b"bundle-data",
        );

    let home = CliHome::new();
    let output = home
        .run_against(&daemon, &["job", "artifacts", "download", "job-9"])
        .await;
    assert!(output.status.success(), "artifact download failed");

    let downloads = daemon.requests_to(Method::GET, "/v1/jobs/job-9/artifacts/download");
    assert_eq!(downloads.len(), 1);
    assert_eq!(
        downloads[0].query.as_deref(),
        Some("path=out%2Fagentlab-artifacts.tar.gz")
    );

    let dest = home.path().join("agentlab-artifacts.tar.gz");
    assert_path_exists(&dest);
    assert_eq!(std::fs::read(&dest).unwrap(), b"bundle-data");
    crate::test_log!("TEST PASS: test_artifact_download_defaults_to_bundle");
}

#[tokio::test]
async fn test_artifact_download_rejects_path_and_name() {
    init_test_logging();
    crate::test_log!("TEST START: test_artifact_download_rejects_path_and_name");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::GET,
        "/v1/jobs/job-9/artifacts",
        200,
        json!({"artifacts": [{"name": "a.txt", "path": "a.txt"}]}),
    );

    let home = CliHome::new();
    let output = home
        .run_against(
            &daemon,
            &[
                "job", "artifacts", "download", "job-9", "--path", "a.txt", "--name", "a.txt",
            ],
        )
        .await;

    assert!(!output.status.success());
    assert!(
        daemon
            .requests_to(Method::GET, "/v1/jobs/job-9/artifacts/download")
            .is_empty()
    );
    crate::test_log!("TEST PASS: test_artifact_download_rejects_path_and_name");
}

#[tokio::test]
async fn test_invalid_plan_exits_1_after_rendering() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_plan_exits_1_after_rendering");

    let daemon = MockDaemon::start().await;
    daemon.on(
        Method::POST,
        "/v1/jobs/validate-plan",
        200,
        json!({"ok": false, "errors": ["profile \"gpu\" not found"], "warnings": []}),
    );

    let home = CliHome::new();
    let output = home
        .run_against(
            &daemon,
            &[
                "job", "validate", "--repo", "https://github.com/org/repo", "--profile", "gpu",
                "--task", "run",
            ],
        )
        .await;

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stdout_of(&output), "not found");
    crate::test_log!("TEST PASS: test_invalid_plan_exits_1_after_rendering");
}
