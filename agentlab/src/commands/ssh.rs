//! `agentlab ssh`: resolve a route to a sandbox and print or exec `ssh`.

use agentlab_common::config::env::ENV_SSH_IDENTITY;
use agentlab_common::{CliError, EnvParser, ErrorKind};
use anyhow::Result;
use is_terminal::IsTerminal;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::AppContext;
use crate::cli::SshArgs;
use crate::hints::wrap_sandbox_not_found;
use crate::reachability::{JumpHost, ReachOptions, Reachable, Route, SystemProber, reach};
use crate::subprocess::SystemRunner;
use crate::transport::ApiError;

/// Budget for start, IP wait and probing when `--timeout` is not given.
const SSH_BUDGET: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct SshReport<'a> {
    vmid: u32,
    ip: &'a str,
    route: Route,
    verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    jump: Option<&'a JumpHost>,
    argv: Vec<String>,
    command: String,
    warnings: &'a [String],
}

fn validate(args: &SshArgs, json: bool, stdin_tty: bool) -> Result<(), CliError> {
    if args.exec && json {
        return Err(CliError::usage("--exec cannot be combined with --json"));
    }
    if args.exec && args.command.is_empty() && !stdin_tty {
        return Err(CliError::usage(
            "--exec needs an interactive terminal unless a remote command is given",
        )
        .with_hint("pass the command after --, e.g. agentlab ssh 9001 --exec -- uptime"));
    }
    Ok(())
}

pub async fn ssh(app: &AppContext, args: SshArgs) -> Result<()> {
    validate(&args, app.is_json(), std::io::stdin().is_terminal())?;

    let mut flags = app.flags.clone();
    if args.jump_host.is_some() {
        flags.jump_host = args.jump_host.clone();
    }
    if args.jump_user.is_some() {
        flags.jump_user = args.jump_user.clone();
    }
    let creds = app.credentials_with(&flags)?;
    let client = crate::transport::Client::new(&creds, app.request_timeout())?;

    let env = EnvParser::from_process();
    let identity = args
        .identity
        .clone()
        .filter(|i| !i.trim().is_empty())
        .or_else(|| env.get_string(ENV_SSH_IDENTITY).map(|s| s.value));

    let mut opts = ReachOptions::new(args.user.clone(), args.port);
    opts.identity = identity;
    opts.jump = creds.effective_jump_host().map(|host| JumpHost {
        user: creds.jump_user.as_ref().map(|u| u.value.clone()),
        host: host.value,
    });
    opts.remote_command = args.command.clone();
    opts.no_start = args.no_start;
    opts.wait = args.wait;
    opts.require_route = args.exec;
    debug!(
        "ssh {}: jump {:?}",
        args.vmid,
        opts.jump.as_ref().map(JumpHost::spec)
    );

    let ctx = app.budget(SSH_BUDGET);
    let runner = SystemRunner;
    let prober = SystemProber { runner: &runner };
    let reachable = match reach(&client, &prober, &ctx, args.vmid, &opts).await {
        Ok(r) => r,
        Err(e) => {
            return match e.downcast::<ApiError>() {
                Ok(api) => Err(wrap_sandbox_not_found(&client, &app.ctx, args.vmid, api).await),
                Err(other) => Err(other),
            };
        }
    };

    for warning in &reachable.warnings {
        app.out.warn(warning);
    }
    if args.exec {
        return exec_ssh(&reachable);
    }
    print_route(app, &reachable)
}

fn print_route(app: &AppContext, r: &Reachable) -> Result<()> {
    let report = SshReport {
        vmid: r.sandbox.vmid,
        ip: &r.target.ip,
        route: r.route,
        verified: r.verified,
        jump: r.target.jump.as_ref(),
        argv: r.target.argv(),
        command: r.target.command_line(),
        warnings: &r.warnings,
    };
    app.out.render(&report, || println!("{}", report.command))
}

#[cfg(unix)]
fn exec_ssh(r: &Reachable) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let argv = r.target.argv();
    info!("exec {}", r.target.command_line());
    let err = std::process::Command::new(&argv[0]).args(&argv[1..]).exec();
    Err(CliError::new(ErrorKind::Subprocess, format!("failed to exec ssh: {err}"))
        .with_hint("check that ssh is installed and on PATH")
        .into())
}

#[cfg(not(unix))]
fn exec_ssh(r: &Reachable) -> Result<()> {
    let argv = r.target.argv();
    info!("running {}", r.target.command_line());
    let status = std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .map_err(|e| CliError::new(ErrorKind::Subprocess, format!("failed to run ssh: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(super::SilentExit(status.code().unwrap_or(1)).into())
    }
}
