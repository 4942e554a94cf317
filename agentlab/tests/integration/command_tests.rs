use crate::common::{
    CliHome, assert_contains, assert_exit, init_test_logging, json_error, stderr_of, stdout_of,
};

#[tokio::test]
async fn test_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_includes_description");

    let home = CliHome::new();
    let output = home.run(&["--help"]).await;

    assert!(output.status.success(), "agentlab --help failed");
    let stdout = stdout_of(&output);
    assert_contains(&stdout, "AgentLab CLI");
    assert_contains(&stdout, "sandbox");
    crate::test_log!("TEST PASS: test_help_includes_description");
}

#[tokio::test]
async fn test_help_in_json_mode_exits_3() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_in_json_mode_exits_3");

    let home = CliHome::new();
    let output = home.run(&["--json", "--help"]).await;

    assert_eq!(output.status.code(), Some(3));
    crate::test_log!("TEST PASS: test_help_in_json_mode_exits_3");
}

#[tokio::test]
async fn test_missing_command_is_usage_error() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_command_is_usage_error");

    let home = CliHome::new();
    let output = home.run(&[]).await;

    assert_eq!(output.status.code(), Some(2));
    assert_contains(&stderr_of(&output), "Usage");
    crate::test_log!("TEST PASS: test_missing_command_is_usage_error");
}

#[tokio::test]
async fn test_unknown_subcommand_suggests_sibling() {
    init_test_logging();
    crate::test_log!("TEST START: test_unknown_subcommand_suggests_sibling");

    let home = CliHome::new();
    let output = home.run(&["sandbox", "lst"]).await;

    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr_of(&output);
    assert_eq!(
        stderr.trim_end(),
        "Error: unknown command \"lst\". Did you mean: list?"
    );
    crate::test_log!("TEST PASS: test_unknown_subcommand_suggests_sibling");
}

#[tokio::test]
async fn test_unknown_command_json_error_body() {
    init_test_logging();
    crate::test_log!("TEST START: test_unknown_command_json_error_body");

    let home = CliHome::new();
    let output = home.run(&["--json", "sandbx"]).await;

    assert_eq!(output.status.code(), Some(2));
    let body = json_error(&output);
    let message = body["error"].as_str().unwrap_or_default();
    assert_contains(message, "unknown command \"sandbx\". Did you mean: ");
    assert_contains(message, "sandbox");
    crate::test_log!("TEST PASS: test_unknown_command_json_error_body");
}

#[tokio::test]
async fn test_missing_required_flag_is_usage_error() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_required_flag_is_usage_error");

    let home = CliHome::new();
    let output = home
        .run(&["job", "run", "--repo", "https://github.com/org/repo"])
        .await;

    assert_eq!(output.status.code(), Some(2));
    crate::test_log!("TEST PASS: test_missing_required_flag_is_usage_error");
}

#[tokio::test]
async fn test_conflicting_workspace_flags_fail_before_any_request() {
    init_test_logging();
    crate::test_log!("TEST START: test_conflicting_workspace_flags_fail_before_any_request");

    let home = CliHome::new();
    let output = home
        .run(&[
            "--endpoint",
            "http://127.0.0.1:1",
            "--json",
            "job",
            "run",
            "--repo",
            "https://github.com/org/repo",
            "--profile",
            "yolo",
            "--task",
            "run",
            "--workspace",
            "ws-1",
            "--workspace-create",
            "scratch",
            "--workspace-size",
            "10G",
        ])
        .await;

    assert_exit(&output, 2);
    let body = json_error(&output);
    assert_contains(body["error"].as_str().unwrap_or_default(), "workspace");
    crate::test_log!("TEST PASS: test_conflicting_workspace_flags_fail_before_any_request");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_operation_failure() {
    init_test_logging();
    crate::test_log!("TEST START: test_unreachable_endpoint_is_operation_failure");

    let home = CliHome::new();
    let output = home
        .run(&["--endpoint", "http://127.0.0.1:1", "--timeout", "2s", "status"])
        .await;

    assert_eq!(output.status.code(), Some(1));
    assert_contains(&stderr_of(&output), "Error:");
    crate::test_log!("TEST PASS: test_unreachable_endpoint_is_operation_failure");
}
