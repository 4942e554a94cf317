//! External command execution.
//!
//! Every subprocess runs with a timeout, captures stdout and stderr, and is
//! logged with secrets masked. Failures quote at most the first 2 KiB of the
//! combined output.

use agentlab_common::util::SUBPROCESS_OUTPUT_LIMIT;
use agentlab_common::{CliError, ErrorKind, mask_sensitive_command, truncate_output};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::context::{Interrupted, RequestContext};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stderr followed by stdout, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stderr.trim().to_string();
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stdout);
        }
        out
    }

    /// Error for a failed command, quoting truncated combined output.
    pub fn failure(&self, what: &str) -> CliError {
        let code = self
            .code
            .map(|c| format!("exit status {c}"))
            .unwrap_or_else(|| "terminated by signal".to_string());
        let detail = mask_sensitive_command(&truncate_output(
            &self.combined(),
            SUBPROCESS_OUTPUT_LIMIT,
        ));
        let message = if detail.is_empty() {
            format!("{what} failed ({code})")
        } else {
            format!("{what} failed ({code}): {detail}")
        };
        CliError::new(ErrorKind::Subprocess, message)
    }
}

/// Something that can run a program to completion.
#[allow(async_fn_in_trait)]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        ctx: &RequestContext,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CliError>;
}

/// Runs real processes.
pub struct SystemRunner;

impl Runner for SystemRunner {
    async fn run(
        &self,
        ctx: &RequestContext,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CliError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        run_command(ctx, cmd, &display_command(program, args), timeout).await
    }
}

/// Shell-style rendering of a command for logs and errors, secrets masked.
pub fn display_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(
        args.iter()
            .map(|a| shell_escape::unix::escape((*a).into()).into_owned()),
    );
    mask_sensitive_command(&parts.join(" "))
}

/// Run a prepared command with stdin closed, under `ctx` and `timeout`.
pub async fn run_command(
    ctx: &RequestContext,
    cmd: Command,
    display: &str,
    timeout: Duration,
) -> Result<CommandOutput, CliError> {
    run_with_stdin(ctx, cmd, Stdio::null(), display, timeout).await
}

/// Like [`run_command`], feeding `input` to the child's stdin.
pub async fn run_command_with_input(
    ctx: &RequestContext,
    cmd: Command,
    input: std::fs::File,
    display: &str,
    timeout: Duration,
) -> Result<CommandOutput, CliError> {
    run_with_stdin(ctx, cmd, Stdio::from(input), display, timeout).await
}

async fn run_with_stdin(
    ctx: &RequestContext,
    mut cmd: Command,
    stdin: Stdio,
    display: &str,
    timeout: Duration,
) -> Result<CommandOutput, CliError> {
    let display_cmd = display;
    debug!("exec: {}", display_cmd);
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        CliError::new(
            ErrorKind::Subprocess,
            format!("failed to start {display}: {e}"),
        )
    })?;

    let ctx = ctx.with_timeout(timeout);
    let output = match ctx.run(child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(CliError::new(
                ErrorKind::Subprocess,
                format!("{display}: {e}"),
            ));
        }
        Err(Interrupted::Canceled) => {
            return Err(CliError::new(
                ErrorKind::Canceled,
                format!("canceled while running {display}"),
            ));
        }
        Err(Interrupted::DeadlineExceeded) => {
            return Err(CliError::new(
                ErrorKind::Timeout,
                format!(
                    "{display} timed out after {}",
                    humantime::format_duration(timeout)
                ),
            ));
        }
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
