//! `agentlab bootstrap`: provision a Proxmox host over SSH.

use agentlab_common::{CliError, EnvParser};
use anyhow::Result;
use std::time::Duration;
use tracing::info;

use super::AppContext;
use crate::bootstrap::bundle::{BinarySource, locate_assets};
use crate::bootstrap::remote::{HostKeyPolicy, SshRemote};
use crate::bootstrap::{BootstrapOptions, credentials_path, run_bootstrap};
use crate::cli::BootstrapArgs;
use crate::output::Output;

/// Whole-run budget when `--timeout` is not given; package installs are slow.
const BOOTSTRAP_BUDGET: Duration = Duration::from_secs(30 * 60);

fn options(args: &BootstrapArgs, env: &EnvParser<'_>) -> Result<BootstrapOptions> {
    if args.host.trim().is_empty() {
        return Err(CliError::usage("--host must not be empty").into());
    }
    let assets = locate_assets(args.assets.as_deref())?;
    let binaries = BinarySource::resolve(
        args.agentlab_bin.clone(),
        args.agentlabd_bin.clone(),
        args.agentlab_url.clone(),
        args.agentlabd_url.clone(),
        &assets,
    )?;
    let mut opts = BootstrapOptions::new(&assets, binaries, credentials_path(env)?);
    opts.control_port = args.control_port;
    opts.control_token = args.control_token.clone().filter(|t| !t.trim().is_empty());
    opts.rotate_control_token = args.rotate_control_token;
    opts.tailscale_serve = match (args.tailscale_serve, args.no_tailscale_serve) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    opts.tailscale_authkey = args.tailscale_authkey.clone().filter(|k| !k.trim().is_empty());
    opts.tailscale_admin_key = args
        .tailscale_admin_key
        .clone()
        .filter(|k| !k.trim().is_empty());
    opts.force = args.force;
    opts.keep_temp = args.keep_temp;
    Ok(opts)
}

pub async fn bootstrap(app: &AppContext, args: BootstrapArgs) -> Result<()> {
    let env = EnvParser::from_process();
    let mut opts = options(&args, &env)?;
    opts.verify_timeout = app.request_timeout();

    let remote = SshRemote {
        destination: args.host.trim().to_string(),
        port: args.ssh_port,
        identity: args.identity.clone(),
        host_keys: match &args.known_hosts {
            Some(path) => HostKeyPolicy::Pinned(path.clone()),
            None => HostKeyPolicy::AcceptNew,
        },
    };
    info!("bootstrapping {} from {}", remote.destination, opts.assets.display());

    let ctx = app.budget(BOOTSTRAP_BUDGET);
    let report = run_bootstrap(&remote, &ctx, &opts, Output::new(app.is_json())).await?;
    app.out.render(&report, || {
        println!();
        println!("bootstrap of {} complete", report.host);
        if let Some(endpoint) = &report.endpoint {
            println!("  endpoint: {endpoint}");
        }
        println!("  credentials: {}", opts.config_path.display());
        println!("next: agentlab status");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bundle::tests::fake_assets;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse(extra: &[&str]) -> BootstrapArgs {
        let mut argv = vec!["agentlab", "bootstrap", "--host", "root@pve"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Bootstrap(args) => args,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn env_with_config(path: String) -> EnvParser<'static> {
        EnvParser::with_lookup(move |var| {
            (var == agentlab_common::config::env::ENV_CONFIG).then(|| path.clone())
        })
    }

    #[test]
    fn test_options_from_flags() {
        let assets = fake_assets();
        let assets_path = assets.path().display().to_string();
        let args = parse(&[
            "--assets",
            &assets_path,
            "--agentlab-url",
            "https://example.test/agentlab",
            "--agentlabd-url",
            "https://example.test/agentlabd",
            "--no-tailscale-serve",
            "--control-token",
            "secret",
        ]);
        let env = env_with_config("/tmp/agentlab-test/config.json".into());
        let opts = options(&args, &env).unwrap();
        assert!(matches!(
            opts.binaries,
            crate::bootstrap::bundle::BinarySource::Download { .. }
        ));
        assert_eq!(opts.tailscale_serve, Some(false));
        assert_eq!(opts.control_token.as_deref(), Some("secret"));
        assert_eq!(opts.control_port, crate::bootstrap::DEFAULT_CONTROL_PORT);
        assert_eq!(
            opts.config_path,
            std::path::PathBuf::from("/tmp/agentlab-test/config.json")
        );
    }

    #[test]
    fn test_options_reject_mixed_binary_sources() {
        let assets = fake_assets();
        let assets_path = assets.path().display().to_string();
        let args = parse(&[
            "--assets",
            &assets_path,
            "--agentlab-bin",
            "/bin/true",
            "--agentlabd-url",
            "https://example.test/agentlabd",
        ]);
        let env = env_with_config("/tmp/agentlab-test/config.json".into());
        assert!(options(&args, &env).is_err());
    }
}
