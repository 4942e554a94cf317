use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::process::Output;

use super::fixtures::{stderr_of, stdout_of};

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}

pub fn assert_not_contains(haystack: &str, needle: &str) {
    assert!(
        !haystack.contains(needle),
        "Did not expect '{needle}' in output, got: {haystack}"
    );
}

pub fn assert_path_exists(path: &Path) {
    assert!(path.exists(), "Expected path to exist: {}", path.display());
}

/// The CLI exited with `code`; stderr is shown on mismatch.
pub fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "unexpected exit, stderr: {}",
        stderr_of(output)
    );
}

/// `agentlab ssh` printed exactly one line, an ssh command ending in
/// `user@ip`. Returns that line.
pub fn assert_ssh_command(output: &Output, user: &str, ip: &str) -> String {
    let stdout = stdout_of(output);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "expected one ssh line, got: {stdout}");
    let pattern = format!(r"^ssh .* {}@{}$", regex::escape(user), regex::escape(ip));
    let re = Regex::new(&pattern).expect("valid ssh line pattern");
    assert!(re.is_match(lines[0]), "'{}' does not match {pattern}", lines[0]);
    lines[0].to_string()
}

/// Parse the single JSON error object printed in `--json` mode.
pub fn json_error(output: &Output) -> Value {
    let stdout = stdout_of(output);
    let body: Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout is not a JSON error ({e}): {stdout}"));
    assert!(body["error"].is_string(), "missing error field: {body}");
    body
}
