//! `agentlab init`: local readiness checks on a configured host, with an
//! optional gated repair pass.
//!
//! The report is the contract consumed by `bootstrap`, which runs
//! `agentlab init --json` remotely and reads `connect_command` from it.

pub mod apply;
pub mod checks;

use agentlab_common::HostConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use self::apply::{AppliedFix, ApplyEnv, apply_fixes};
use self::checks::{CheckResult, CheckStatus, Checker, TAILSCALE_SERVE};
use crate::context::RequestContext;
use crate::reachability::shell_quote;
use crate::subprocess::Runner;

pub const DEFAULT_SKILL_INSTALL_DIR: &str = "/usr/local/share/agentlab/skills/agentlab";
pub const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    pub checks: Vec<CheckResult>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<AppliedFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tailscale_dns: Option<String>,
}

impl InitReport {
    /// `(endpoint, token)` from `agentlab connect --endpoint E --token T`.
    pub fn connect_credentials(&self) -> Option<(String, String)> {
        parse_connect_command(self.connect_command.as_deref()?)
    }
}

pub fn parse_connect_command(command: &str) -> Option<(String, String)> {
    let words: Vec<&str> = command.split_whitespace().collect();
    if words.len() < 2 || words[0] != "agentlab" || words[1] != "connect" {
        return None;
    }
    let flag = |name: &str| {
        let with_eq = format!("{name}=");
        words.iter().enumerate().find_map(|(i, w)| {
            if *w == name {
                words.get(i + 1).map(|v| unquote(v))
            } else {
                w.strip_prefix(&with_eq).map(unquote)
            }
        })
    };
    let endpoint = flag("--endpoint").filter(|e| !e.is_empty())?;
    let token = flag("--token").filter(|t| !t.is_empty())?;
    Some((endpoint, token))
}

fn unquote(word: &str) -> String {
    word.trim_matches('\'').trim_matches('"').to_string()
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub config_path: PathBuf,
    pub assets: Option<PathBuf>,
    pub ip_forward_path: PathBuf,
    pub skill_install_dir: PathBuf,
    pub apply: bool,
}

/// Tailscale MagicDNS name of this node, without the trailing dot.
async fn tailscale_dns<R: Runner>(runner: &R, ctx: &RequestContext) -> Option<String> {
    let out = runner
        .run(ctx, "tailscale", &["status", "--json"], Duration::from_secs(10))
        .await
        .ok()
        .filter(|o| o.success)?;
    let status: serde_json::Value = serde_json::from_str(&out.stdout).ok()?;
    let dns = status["Self"]["DNSName"].as_str()?.trim_end_matches('.');
    (!dns.is_empty()).then(|| dns.to_string())
}

fn local_hostname() -> Option<String> {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Control endpoint reachable by remote clients.
pub fn control_endpoint(
    config: &HostConfig,
    tailscale_dns: Option<&str>,
    serve_ok: bool,
) -> Option<String> {
    let (host, port) = config.control_host_port().ok()?;
    if serve_ok && let Some(dns) = tailscale_dns {
        return Some(format!("http://{dns}:{port}"));
    }
    let host = match host.as_str() {
        "" | "0.0.0.0" | "::" => local_hostname()?,
        h if h.contains(':') => format!("[{h}]"),
        h => h.to_string(),
    };
    Some(format!("http://{host}:{port}"))
}

/// Every check, in report order.
pub async fn run_checks<R: Runner>(checker: &Checker<'_, R>) -> Vec<CheckResult> {
    let (profiles, templates) = checker.profiles();
    vec![
        checker.control_plane(),
        checker.tailscale_serve().await,
        checker.bridge_vmbr1().await,
        checker.ip_forward(),
        checker.nftables().await,
        profiles,
        checker.templates(&templates).await,
        checker.skill_bundle(),
    ]
}

/// Run the checks, optionally repair, and assemble the report.
pub async fn run_init<R: Runner>(
    runner: &R,
    ctx: &RequestContext,
    config: Option<&HostConfig>,
    opts: &InitOptions,
) -> InitReport {
    let checker = Checker {
        runner,
        ctx,
        config,
        config_path: &opts.config_path,
        ip_forward_path: &opts.ip_forward_path,
        assets: opts.assets.as_deref(),
        skill_install_dir: &opts.skill_install_dir,
    };
    let mut results = run_checks(&checker).await;

    let mut applied = Vec::new();
    if opts.apply {
        let env = ApplyEnv {
            assets: opts.assets.as_deref(),
            control_port: config
                .and_then(|c| c.control_host_port().ok())
                .map(|(_, port)| port),
            skill_install_dir: &opts.skill_install_dir,
        };
        applied = apply_fixes(runner, ctx, &results, &env).await;
        debug!("applied {} fix(es); re-running checks", applied.len());
        results = run_checks(&checker).await;
    }

    let serve_ok = results
        .iter()
        .any(|c| c.name == TAILSCALE_SERVE && c.status == CheckStatus::Ok);
    let dns = tailscale_dns(runner, ctx).await;
    let endpoint = config
        .filter(|c| c.has_remote_control())
        .and_then(|c| control_endpoint(c, dns.as_deref(), serve_ok));
    let connect_command = match (&endpoint, config) {
        (Some(endpoint), Some(cfg)) => Some(format!(
            "agentlab connect --endpoint {} --token {}",
            shell_quote(endpoint),
            shell_quote(cfg.control_auth_token.trim())
        )),
        _ => None,
    };

    InitReport {
        ok: !results.iter().any(|c| c.status.is_problem()),
        checks: results,
        applied,
        control_endpoint: endpoint,
        connect_command,
        agent_subnet: config.map(|c| c.agent_subnet.clone()),
        tailscale_dns: dns,
    }
}

/// Host config at `path`; `None` when absent.
pub fn load_host_config(path: &Path) -> anyhow::Result<Option<HostConfig>> {
    Ok(HostConfig::load(path)?)
}
