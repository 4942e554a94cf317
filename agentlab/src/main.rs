//! AgentLab CLI
//!
//! Client for `agentlabd`: drives sandboxes, jobs, workspaces and sessions
//! over the local Unix socket or a remote HTTP endpoint, and bootstraps new
//! Proxmox hosts over SSH.

#![forbid(unsafe_code)]

mod artifacts;
mod bootstrap;
mod cli;
mod commands;
mod confirm;
mod context;
mod hints;
mod init;
mod output;
mod reachability;
mod subprocess;
mod tail;
mod transport;

use agentlab_common::config::env::ENV_TOKEN;
use agentlab_common::{
    ClientConfig, CliError, ConfigError, CredentialFlags, EnvParser, ErrorKind, LogConfig,
    did_you_mean, init_logging, rank_suggestions,
};
use clap::error::{ContextKind, ContextValue, ErrorKind as ClapErrorKind};
use clap::{CommandFactory, FromArgMatches};
use std::io::Write;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use cli::Cli;
use commands::{AppContext, SilentExit};
use confirm::TerminalPrompter;
use context::RequestContext;
use output::Output;
use transport::ApiError;

/// Exit status for help requested in `--json` mode.
const EXIT_HELP_SCRIPTED: u8 = 3;

/// Global flags that take a separate value.
const VALUE_FLAGS: &[&str] = &["--endpoint", "--token", "--socket", "--timeout"];

/// Flags whose values never appear in output.
const SECRET_FLAGS: &[&str] = &[
    "--token",
    "--control-token",
    "--tailscale-authkey",
    "--tailscale-admin-key",
];

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let json = leading_json(&argv);

    let matches = match Cli::command().try_get_matches_from(&argv) {
        Ok(m) => m,
        Err(e) => return parse_failure(e, &argv, json),
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => return parse_failure(e, &argv, json),
    };

    let env = EnvParser::from_process();
    init_logging(&LogConfig::from_env(&env, cli.verbose), &env);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                cancel.cancel();
            }
        });
    }

    let app = AppContext {
        out: Output::new(cli.json),
        ctx: RequestContext::new(cancel),
        timeout: cli.timeout,
        flags: CredentialFlags {
            endpoint: cli.endpoint,
            token: cli.token,
            socket: cli.socket,
            ..Default::default()
        },
        prompter: Box::new(TerminalPrompter),
    };

    match commands::dispatch(&app, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(SilentExit(code)) = err.downcast_ref::<SilentExit>() {
                return exit_code(*code);
            }
            let cli_err = classify(err).redacted(&secret_refs(&collect_secrets(&argv, &env)));
            report(&cli_err, app.is_json());
            exit_code(cli_err.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// `--json` among the global flags, before the first subcommand.
fn leading_json(argv: &[String]) -> bool {
    let mut args = argv.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--json" {
            return true;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
            continue;
        }
        if !arg.starts_with('-') || arg == "--" {
            return false;
        }
    }
    false
}

fn report(err: &CliError, json: bool) {
    if json {
        println!("{}", err.to_json());
    } else {
        eprintln!("{}", err.to_text());
    }
}

// =============================================================================
// Parse failures
// =============================================================================

fn parse_failure(e: clap::Error, argv: &[String], json: bool) -> ExitCode {
    match e.kind() {
        ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
            let _ = e.print();
            if json && e.kind() == ClapErrorKind::DisplayHelp {
                ExitCode::from(EXIT_HELP_SCRIPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand | ClapErrorKind::MissingSubcommand => {
            let mut cmd = Cli::command();
            let _ = writeln!(std::io::stderr(), "{}", cmd.render_help());
            usage_exit()
        }
        ClapErrorKind::InvalidSubcommand => {
            let err = unknown_command(&e, argv);
            report(&err, json);
            usage_exit()
        }
        _ => {
            if json {
                let rendered = e.render().to_string();
                let first = rendered
                    .lines()
                    .next()
                    .unwrap_or("invalid arguments")
                    .trim_start_matches("error: ")
                    .to_string();
                let secrets = collect_secrets(argv, &EnvParser::with_lookup(|_| None));
                report(&CliError::usage(first).redacted(&secret_refs(&secrets)), true);
            } else {
                let _ = e.print();
            }
            usage_exit()
        }
    }
}

fn usage_exit() -> ExitCode {
    exit_code(ErrorKind::Usage.exit_code())
}

/// `unknown command "X". Did you mean: Y, Z?`, or a pointer to `--help`
/// when nothing is close.
fn unknown_command(e: &clap::Error, argv: &[String]) -> CliError {
    let bad = match e.get(ContextKind::InvalidSubcommand) {
        Some(ContextValue::String(s)) => s.clone(),
        _ => String::new(),
    };

    let mut cmd = Cli::command();
    let mut path = vec![cmd.get_name().to_string()];
    for arg in argv.iter().skip(1) {
        if *arg == bad {
            break;
        }
        if arg.starts_with('-') {
            continue;
        }
        let Some(sub) = cmd.find_subcommand(arg).cloned() else {
            continue;
        };
        path.push(sub.get_name().to_string());
        cmd = sub;
    }

    let names: Vec<String> = cmd
        .get_subcommands()
        .filter(|s| !s.is_hide_set())
        .map(|s| s.get_name().to_string())
        .filter(|n| n != "help")
        .collect();
    match did_you_mean(&rank_suggestions(&bad, &names, 3)) {
        Some(suggestion) => CliError::usage(format!("unknown command {bad:?}. {suggestion}")),
        None => CliError::usage(format!("unknown command {bad:?}"))
            .with_next(format!("run `{} --help` for usage", path.join(" "))),
    }
}

// =============================================================================
// Error boundary
// =============================================================================

/// Map any handler error onto the CLI taxonomy.
fn classify(err: anyhow::Error) -> CliError {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return cli.clone();
    }
    let message = format!("{err:#}");
    let kind = if let Some(api) = err.downcast_ref::<ApiError>() {
        match api {
            e if e.is_not_found() => ErrorKind::NotFound,
            ApiError::Status { .. } | ApiError::Decode { .. } | ApiError::ResponseTooLarge { .. } => {
                ErrorKind::Protocol
            }
            ApiError::Connect { .. } | ApiError::Io { .. } => ErrorKind::Transport,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Canceled { .. } => ErrorKind::Canceled,
            ApiError::InvalidEndpoint(_) => ErrorKind::Config,
            ApiError::Encode(_) | ApiError::InvalidPath(_) => ErrorKind::Operation,
        }
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ErrorKind::Config
    } else {
        ErrorKind::Operation
    };
    CliError::new(kind, message)
}

/// Secret values from argv, the environment and the credentials file.
fn collect_secrets(argv: &[String], env: &EnvParser<'_>) -> Vec<String> {
    let mut secrets = Vec::new();
    let mut args = argv.iter();
    while let Some(arg) = args.next() {
        for flag in SECRET_FLAGS {
            if arg == flag {
                if let Some(value) = args.clone().next() {
                    secrets.push(value.clone());
                }
            } else if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
                secrets.push(value.to_string());
            }
        }
    }
    if let Some(token) = env.get_string(ENV_TOKEN) {
        secrets.push(token.value);
    }
    if let Ok(Some(file)) = ClientConfig::default_path(env).and_then(|p| ClientConfig::load(&p)) {
        secrets.push(file.token);
    }
    secrets.retain(|s| !s.trim().is_empty());
    secrets
}

fn secret_refs(secrets: &[String]) -> Vec<&str> {
    secrets.iter().map(String::as_str).collect()
}
