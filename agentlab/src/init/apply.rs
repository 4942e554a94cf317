//! Fixers run by `agentlab init --apply`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::checks::{
    BRIDGE_VMBR1, CheckResult, IP_FORWARD, NFTABLES, SKILL_BUNDLE, TAILSCALE_SERVE,
};
use crate::context::RequestContext;
use crate::subprocess::Runner;

const FIX_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub check: String,
    pub action: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

pub struct ApplyEnv<'a> {
    pub assets: Option<&'a Path>,
    pub control_port: Option<u16>,
    pub skill_install_dir: &'a Path,
}

/// The command that repairs `check`, if one exists.
fn fix_command(check: &str, env: &ApplyEnv<'_>) -> Option<(String, Vec<String>)> {
    let script = |rel: &str| {
        env.assets
            .map(|a| a.join(rel).display().to_string())
    };
    match check {
        BRIDGE_VMBR1 => Some((script("scripts/net/setup_vmbr1.sh")?, vec!["--apply".into()])),
        NFTABLES => Some((script("scripts/net/apply.sh")?, vec!["--apply".into()])),
        IP_FORWARD => Some((
            "sysctl".into(),
            vec!["-w".into(), "net.ipv4.ip_forward=1".into()],
        )),
        TAILSCALE_SERVE => {
            let port = env.control_port?;
            Some((
                "tailscale".into(),
                vec![
                    "serve".into(),
                    "--bg".into(),
                    "--tcp".into(),
                    port.to_string(),
                    format!("tcp://127.0.0.1:{port}"),
                ],
            ))
        }
        _ => None,
    }
}

/// Copy the skill bundle from the assets into its install directory.
pub fn install_skill_bundle(source: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let rel = entry.path().strip_prefix(source)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", target.display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Run a fixer for every check that reported a problem.
pub async fn apply_fixes<R: Runner>(
    runner: &R,
    ctx: &RequestContext,
    checks: &[CheckResult],
    env: &ApplyEnv<'_>,
) -> Vec<AppliedFix> {
    let mut applied = Vec::new();
    for check in checks.iter().filter(|c| c.status.is_problem()) {
        if check.name == SKILL_BUNDLE {
            let Some(assets) = env.assets else { continue };
            let source = assets.join("skills/agentlab");
            let fix = match install_skill_bundle(&source, env.skill_install_dir) {
                Ok(n) => AppliedFix {
                    check: check.name.clone(),
                    action: format!("install skill bundle to {}", env.skill_install_dir.display()),
                    ok: true,
                    detail: format!("{n} file(s)"),
                },
                Err(e) => AppliedFix {
                    check: check.name.clone(),
                    action: "install skill bundle".into(),
                    ok: false,
                    detail: format!("{e:#}"),
                },
            };
            applied.push(fix);
            continue;
        }

        let Some((program, args)) = fix_command(&check.name, env) else {
            continue;
        };
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let action = format!("{} {}", program, args.join(" "));
        info!("init --apply: {}", action);
        let fix = match runner.run(ctx, &program, &arg_refs, FIX_TIMEOUT).await {
            Ok(out) if out.success => AppliedFix {
                check: check.name.clone(),
                action,
                ok: true,
                detail: String::new(),
            },
            Ok(out) => AppliedFix {
                check: check.name.clone(),
                action,
                ok: false,
                detail: out.failure(&program).message,
            },
            Err(e) => AppliedFix {
                check: check.name.clone(),
                action,
                ok: false,
                detail: e.message,
            },
        };
        if !fix.ok {
            warn!("fix for {} failed: {}", fix.check, fix.detail);
        }
        applied.push(fix);
    }
    applied
}
