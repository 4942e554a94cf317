//! One-shot host bootstrap over SSH.
//!
//! Steps run strictly in order; each emits a `StepRecord` so the run reads
//! as a transcript. Network setup precedes the daemon install, which
//! precedes `agentlab init`. Any hard failure aborts the run; only the final
//! control-plane verification downgrades to a warning.

pub mod bundle;
pub mod remote;

use agentlab_common::config::host::DEFAULT_HOST_CONFIG_PATH;
use agentlab_common::protocol::StatusResponse;
use agentlab_common::{
    ClientConfig, CliError, CredentialFlags, EnvParser, ErrorKind, HostConfig, normalize_endpoint,
    resolve_credentials,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use self::bundle::{BinarySource, build_bundle};
use self::remote::{Remote, split_destination};
use crate::context::RequestContext;
use crate::init::InitReport;
use crate::output::Output;
use crate::reachability::shell_quote;
use crate::subprocess::CommandOutput;
use crate::transport::{Client, DEFAULT_REQUEST_TIMEOUT};

pub const DEFAULT_CONTROL_PORT: u16 = 8845;
pub const TAILSCALE_API_BASE: &str = "https://api.tailscale.com";

const SHORT_STEP: Duration = Duration::from_secs(30);
const UPLOAD_STEP: Duration = Duration::from_secs(300);
const LONG_STEP: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Skipped,
    Warning,
    Failed,
}

impl StepStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Warning => "warning",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub host: String,
    pub remote_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub assets: PathBuf,
    pub binaries: BinarySource,
    pub control_port: u16,
    pub control_token: Option<String>,
    pub rotate_control_token: bool,
    /// `Some(true)` for `--tailscale-serve`, `Some(false)` for `--no-tailscale-serve`.
    pub tailscale_serve: Option<bool>,
    pub tailscale_authkey: Option<String>,
    pub tailscale_admin_key: Option<String>,
    pub tailscale_api_base: String,
    pub force: bool,
    pub keep_temp: bool,
    pub config_path: PathBuf,
    pub verify_timeout: Duration,
}

/// Records steps and prints them as they complete in text mode.
struct Transcript {
    out: Output,
    steps: Vec<StepRecord>,
}

impl Transcript {
    fn record(&mut self, step: &str, status: StepStatus, detail: impl Into<String>) {
        let record = StepRecord {
            step: step.to_string(),
            status,
            detail: detail.into(),
        };
        if !self.out.is_json() {
            if record.detail.is_empty() {
                self.out.line(format!("[{}] {}", status.label(), record.step));
            } else {
                self.out
                    .line(format!("[{}] {}: {}", status.label(), record.step, record.detail));
            }
        }
        info!("bootstrap {} {}", record.step, status.label());
        self.steps.push(record);
    }

    /// Record a failed step and build the abort error.
    fn abort(&mut self, step: &str, err: CliError, remote_dir: &str) -> anyhow::Error {
        self.record(step, StepStatus::Failed, err.message.clone());
        err.with_hint(format!("remote files were left in {remote_dir}"))
            .into()
    }
}

/// `sudo ` unless the SSH user is root.
fn sudo_prefix(is_root: bool) -> &'static str {
    if is_root { "" } else { "sudo " }
}

pub fn install_args(opts: &BootstrapOptions) -> Vec<String> {
    let mut args = vec![
        "--enable-remote-control".to_string(),
        "--control-port".to_string(),
        opts.control_port.to_string(),
    ];
    if let Some(token) = &opts.control_token {
        args.push("--control-token".into());
        args.push(token.clone());
    }
    if opts.rotate_control_token {
        args.push("--rotate-control-token".into());
    }
    match opts.tailscale_serve {
        Some(true) => args.push("--tailscale-serve".into()),
        Some(false) => args.push("--no-tailscale-serve".into()),
        None => {}
    }
    args
}

fn download_script(remote_dir: &str, cli_url: &str, daemon_url: &str) -> String {
    let dir = shell_quote(remote_dir);
    let (cli, daemon) = (shell_quote(cli_url), shell_quote(daemon_url));
    format!(
        "cd {dir} && mkdir -p dist && if command -v curl >/dev/null 2>&1; then \
         curl -fsSL -o dist/agentlab {cli} && curl -fsSL -o dist/agentlabd {daemon}; \
         else wget -q -O dist/agentlab {cli} && wget -q -O dist/agentlabd {daemon}; fi \
         && chmod +x dist/agentlab dist/agentlabd"
    )
}

fn backup_script(sudo: &str) -> String {
    let path = DEFAULT_HOST_CONFIG_PATH;
    format!(
        "if [ -f {path} ]; then b={path}.bak.$(date -u +%Y%m%dT%H%M%SZ); \
         {sudo}cp -p {path} \"$b\" && echo BACKUP=$b; fi"
    )
}

/// Path from a `BACKUP=<path>` marker line.
pub fn parse_backup_marker(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("BACKUP="))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
}

/// `Self.ID` from `tailscale status --json`.
pub fn parse_tailscale_node_id(status_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(status_json).ok()?;
    value["Self"]["ID"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn approve_routes(
    api_base: &str,
    admin_key: &str,
    device_id: &str,
    subnet: &str,
) -> Result<(), CliError> {
    let url = format!(
        "{}/api/v2/device/{}/routes",
        api_base.trim_end_matches('/'),
        urlencoding::encode(device_id)
    );
    let resp = reqwest::Client::new()
        .post(&url)
        .bearer_auth(admin_key)
        .json(&serde_json::json!({ "routes": [subnet] }))
        .timeout(SHORT_STEP)
        .send()
        .await
        .map_err(|e| {
            CliError::new(
                ErrorKind::Transport,
                format!("tailscale API request failed: {}", e.without_url()),
            )
        })?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CliError::new(
        ErrorKind::Protocol,
        format!(
            "tailscale API returned {}: {}",
            status.as_u16(),
            agentlab_common::truncate_output(&body, 512)
        ),
    ))
}

async fn verify_control_plane(
    ctx: &RequestContext,
    endpoint: &str,
    token: &str,
    timeout: Duration,
) -> Result<StatusResponse> {
    let flags = CredentialFlags {
        endpoint: Some(endpoint.to_string()),
        token: Some(token.to_string()),
        ..Default::default()
    };
    let env = EnvParser::with_lookup(|_| None);
    let creds = resolve_credentials(&flags, &env, None)?;
    let client = Client::new(&creds, timeout)?;
    Ok(client.get(ctx, "/v1/status").await?)
}

fn checked(out: CommandOutput, what: &str) -> Result<CommandOutput, CliError> {
    if out.success {
        Ok(out)
    } else {
        Err(out.failure(what))
    }
}

/// Run every bootstrap step against `remote`.
pub async fn run_bootstrap<R: Remote>(
    remote: &R,
    ctx: &RequestContext,
    opts: &BootstrapOptions,
    out: Output,
) -> Result<BootstrapReport> {
    let stamp = chrono::Utc::now().timestamp();
    let remote_dir = format!("/tmp/agentlab-bootstrap-{stamp}");
    let dir_q = shell_quote(&remote_dir);
    let mut t = Transcript {
        out,
        steps: Vec::new(),
    };

    // 1. prepare_remote_dir
    let step = "prepare_remote_dir";
    let whoami = match remote
        .run(ctx, &format!("mkdir -p {dir_q} && id -u"), SHORT_STEP)
        .await
        .and_then(|o| checked(o, "mkdir"))
    {
        Ok(o) => o,
        Err(e) => return Err(t.abort(step, e, &remote_dir)),
    };
    let is_root = whoami.stdout.trim() == "0";
    let sudo = sudo_prefix(is_root);
    t.record(step, StepStatus::Ok, remote_dir.clone());

    // 2. upload_bundle
    let step = "upload_bundle";
    let (bundle_file, files) = match build_bundle(&opts.assets, &opts.binaries) {
        Ok(b) => b,
        Err(e) => return Err(t.abort(step, CliError::operation(format!("{e:#}")), &remote_dir)),
    };
    let remote_bundle = format!("{remote_dir}/bundle.tar.gz");
    if let Err(e) = remote
        .upload(ctx, bundle_file.path(), &remote_bundle, UPLOAD_STEP)
        .await
    {
        return Err(t.abort(step, e, &remote_dir));
    }
    t.record(step, StepStatus::Ok, format!("{files} file(s)"));

    // 3. extract_bundle
    let step = "extract_bundle";
    let script = format!("cd {dir_q} && tar -xzf bundle.tar.gz");
    if let Err(e) = remote.run(ctx, &script, SHORT_STEP).await.and_then(|o| checked(o, "tar")) {
        return Err(t.abort(step, e, &remote_dir));
    }
    t.record(step, StepStatus::Ok, "");

    // 4. download_binaries
    let step = "download_binaries";
    match &opts.binaries {
        BinarySource::Download {
            agentlab,
            agentlabd,
        } => {
            let script = download_script(&remote_dir, agentlab, agentlabd);
            if let Err(e) = remote
                .run(ctx, &script, LONG_STEP)
                .await
                .and_then(|o| checked(o, "binary download"))
            {
                return Err(t.abort(step, e, &remote_dir));
            }
            t.record(step, StepStatus::Ok, "");
        }
        BinarySource::Upload { .. } => t.record(step, StepStatus::Skipped, "binaries uploaded"),
    }

    let force = if opts.force { " --force" } else { "" };

    // 5. configure_vmbr1
    let step = "configure_vmbr1";
    let script = format!("cd {dir_q} && {sudo}scripts/net/setup_vmbr1.sh --apply{force}");
    if let Err(e) = remote
        .run(ctx, &script, LONG_STEP)
        .await
        .and_then(|o| checked(o, "setup_vmbr1.sh"))
    {
        return Err(t.abort(step, e, &remote_dir));
    }
    t.record(step, StepStatus::Ok, "");

    // 6. configure_nftables
    let step = "configure_nftables";
    let script = format!("cd {dir_q} && {sudo}scripts/net/apply.sh --apply{force}");
    if let Err(e) = remote
        .run(ctx, &script, LONG_STEP)
        .await
        .and_then(|o| checked(o, "apply.sh"))
    {
        return Err(t.abort(step, e, &remote_dir));
    }
    t.record(step, StepStatus::Ok, "");

    // 7. configure_tailscale_router
    let step = "configure_tailscale_router";
    let subnet = HostConfig::default().agent_subnet;
    match &opts.tailscale_authkey {
        Some(key) => {
            let script = format!(
                "{sudo}tailscale up --authkey={} --advertise-routes={} --accept-dns=false",
                shell_quote(key),
                shell_quote(&subnet)
            );
            if let Err(e) = remote
                .run(ctx, &script, LONG_STEP)
                .await
                .and_then(|o| checked(o, "tailscale up"))
            {
                return Err(t.abort(step, e, &remote_dir));
            }
            t.record(step, StepStatus::Ok, format!("advertising {subnet}"));
        }
        None => t.record(step, StepStatus::Skipped, "no --tailscale-authkey"),
    }

    // 8. backup_config
    let step = "backup_config";
    match remote
        .run(ctx, &backup_script(sudo), SHORT_STEP)
        .await
        .and_then(|o| checked(o, "config backup"))
    {
        Ok(o) => match parse_backup_marker(&o.stdout) {
            Some(path) => t.record(step, StepStatus::Ok, path),
            None => t.record(step, StepStatus::Skipped, "no existing config"),
        },
        Err(e) => return Err(t.abort(step, e, &remote_dir)),
    }

    // 9. install_agentlab
    let step = "install_agentlab";
    let args: Vec<String> = install_args(opts).iter().map(|a| shell_quote(a)).collect();
    let script = format!(
        "cd {dir_q} && {sudo}scripts/install_host.sh {}",
        args.join(" ")
    );
    if let Err(e) = remote
        .run(ctx, &script, LONG_STEP)
        .await
        .and_then(|o| checked(o, "install_host.sh"))
    {
        return Err(t.abort(step, e, &remote_dir));
    }
    t.record(step, StepStatus::Ok, format!("control port {}", opts.control_port));

    // 10. agentlab_init
    let step = "agentlab_init";
    let init_out = match remote
        .run(ctx, &format!("{sudo}agentlab init --json"), LONG_STEP)
        .await
        .and_then(|o| checked(o, "agentlab init"))
    {
        Ok(o) => o,
        Err(e) => return Err(t.abort(step, e, &remote_dir)),
    };
    let report: InitReport = match serde_json::from_str(init_out.stdout.trim()) {
        Ok(r) => r,
        Err(e) => {
            return Err(t.abort(
                step,
                CliError::operation(format!("could not parse remote init report: {e}")),
                &remote_dir,
            ));
        }
    };
    let Some((raw_endpoint, token)) = report.connect_credentials() else {
        return Err(t.abort(
            step,
            CliError::operation("remote init report has no connect_command"),
            &remote_dir,
        ));
    };
    let failing: Vec<&str> = report
        .checks
        .iter()
        .filter(|c| c.status.is_problem())
        .map(|c| c.name.as_str())
        .collect();
    if failing.is_empty() {
        t.record(step, StepStatus::Ok, "all checks passed");
    } else {
        t.record(step, StepStatus::Warning, format!("checks not ok: {}", failing.join(", ")));
    }

    // 11. write_client_config
    let step = "write_client_config";
    let endpoint = match normalize_endpoint(&raw_endpoint) {
        Ok(e) => e,
        Err(e) => return Err(t.abort(step, CliError::operation(e.to_string()), &remote_dir)),
    };
    let (ssh_user, ssh_host) = split_destination(remote.destination());
    let config = ClientConfig {
        endpoint: endpoint.clone(),
        token: token.clone(),
        jump_host: ssh_host.to_string(),
        jump_user: ssh_user.unwrap_or_default().to_string(),
    };
    if let Err(e) = config.save(&opts.config_path) {
        return Err(t.abort(step, CliError::new(ErrorKind::Config, e.to_string()), &remote_dir));
    }
    t.record(
        step,
        StepStatus::Ok,
        format!("{} (endpoint {endpoint})", opts.config_path.display()),
    );

    // 12. approve_tailscale_routes
    let step = "approve_tailscale_routes";
    match &opts.tailscale_admin_key {
        Some(admin_key) => {
            let subnet = report.agent_subnet.clone().unwrap_or(subnet);
            let status = match remote
                .run(ctx, "tailscale status --json", SHORT_STEP)
                .await
                .and_then(|o| checked(o, "tailscale status"))
            {
                Ok(o) => o,
                Err(e) => return Err(t.abort(step, e, &remote_dir)),
            };
            let Some(device) = parse_tailscale_node_id(&status.stdout) else {
                return Err(t.abort(
                    step,
                    CliError::operation("tailscale status did not report a node ID"),
                    &remote_dir,
                ));
            };
            if let Err(e) =
                approve_routes(&opts.tailscale_api_base, admin_key, &device, &subnet).await
            {
                return Err(t.abort(step, e, &remote_dir));
            }
            t.record(step, StepStatus::Ok, format!("approved {subnet} on {device}"));
        }
        None => t.record(step, StepStatus::Skipped, "no --tailscale-admin-key"),
    }

    // 13. verify_control_plane
    let step = "verify_control_plane";
    match verify_control_plane(ctx, &endpoint, &token, opts.verify_timeout).await {
        Ok(status) => t.record(
            step,
            StepStatus::Ok,
            status
                .version
                .map(|v| format!("agentlabd {v}"))
                .unwrap_or_else(|| "reachable".to_string()),
        ),
        Err(e) => {
            let message = agentlab_common::sanitize(&format!("{e:#}"), &[token.as_str()]);
            debug!("control plane verification failed: {}", message);
            t.record(step, StepStatus::Warning, message);
        }
    }

    // 14. cleanup_remote
    let step = "cleanup_remote";
    if opts.keep_temp {
        t.record(step, StepStatus::Skipped, "--keep-temp");
    } else {
        match remote
            .run(ctx, &format!("rm -rf {dir_q}"), SHORT_STEP)
            .await
            .and_then(|o| checked(o, "cleanup"))
        {
            Ok(_) => t.record(step, StepStatus::Ok, ""),
            Err(e) => return Err(t.abort(step, e, &remote_dir)),
        }
    }

    Ok(BootstrapReport {
        host: remote.destination().to_string(),
        remote_dir,
        endpoint: Some(endpoint),
        steps: t.steps,
    })
}

/// Default credentials path for bootstrap, honoring `AGENTLAB_CONFIG`.
pub fn credentials_path(env: &EnvParser<'_>) -> Result<PathBuf> {
    ClientConfig::default_path(env).context("locate credentials file")
}

impl BootstrapOptions {
    pub fn new(assets: &Path, binaries: BinarySource, config_path: PathBuf) -> Self {
        Self {
            assets: assets.to_path_buf(),
            binaries,
            control_port: DEFAULT_CONTROL_PORT,
            control_token: None,
            rotate_control_token: false,
            tailscale_serve: None,
            tailscale_authkey: None,
            tailscale_admin_key: None,
            tailscale_api_base: TAILSCALE_API_BASE.to_string(),
            force: false,
            keep_temp: false,
            config_path,
            verify_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
