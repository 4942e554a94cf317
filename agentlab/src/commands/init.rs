//! `agentlab init`: local host readiness checks.

use agentlab_common::CliError;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::AppContext;
use crate::cli::InitArgs;
use crate::init::{
    DEFAULT_SKILL_INSTALL_DIR, IP_FORWARD_PATH, InitOptions, InitReport, load_host_config, run_init,
};
use crate::output::Table;
use crate::subprocess::SystemRunner;

/// Checks shell out to tailscale, nft and systemctl; repairs may install.
const INIT_BUDGET: Duration = Duration::from_secs(600);

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

pub async fn init(app: &AppContext, args: InitArgs) -> Result<()> {
    if args.apply && !is_root() {
        return Err(CliError::usage("init --apply must run as root")
            .with_hint("re-run with sudo: sudo agentlab init --apply")
            .into());
    }

    let config = match load_host_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!("ignoring unreadable host config {}: {:#}", args.config.display(), e);
            None
        }
    };
    let opts = InitOptions {
        config_path: args.config.clone(),
        assets: args.assets.clone(),
        ip_forward_path: PathBuf::from(IP_FORWARD_PATH),
        skill_install_dir: PathBuf::from(DEFAULT_SKILL_INSTALL_DIR),
        apply: args.apply,
    };

    let ctx = app.budget(INIT_BUDGET);
    let report = run_init(&SystemRunner, &ctx, config.as_ref(), &opts).await;
    info!("init finished: ok={}", report.ok);
    app.out.render(&report, || print_report(&report))
}

fn print_report(report: &InitReport) {
    let mut table = Table::new(["CHECK", "STATUS", "DETAIL"]);
    for check in &report.checks {
        table.row([
            check.name.clone(),
            check.status.as_str().to_string(),
            check.detail.clone(),
        ]);
    }
    table.print();

    if !report.applied.is_empty() {
        println!();
        println!("applied:");
        for fix in &report.applied {
            let mark = if fix.ok { "ok" } else { "failed" };
            if fix.detail.is_empty() {
                println!("  [{mark}] {}: {}", fix.check, fix.action);
            } else {
                println!("  [{mark}] {}: {} ({})", fix.check, fix.action, fix.detail);
            }
        }
    }

    println!();
    if report.ok {
        println!("host looks ready");
    } else {
        println!("host needs attention; run `sudo agentlab init --apply` to repair");
    }
    if let Some(subnet) = &report.agent_subnet {
        println!("agent subnet: {subnet}");
    }
    if let Some(endpoint) = &report.control_endpoint {
        println!("control endpoint: {endpoint}");
    }
    if let Some(cmd) = &report.connect_command {
        println!("connect from your workstation with:");
        println!("  {cmd}");
    }
}
