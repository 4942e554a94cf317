//! `agentlab sandbox`: lifecycle, leases, exposures, doctor.

use agentlab_common::protocol::{
    ExposureCreateRequest, ExposuresResponse, ForceRequest, LeaseRenewRequest, PruneResponse,
    RevertRequest, SandboxCreateRequest, SandboxesResponse, StopAllOutcome, StopAllResponse,
};
use agentlab_common::{CliError, Exposure, Sandbox, SandboxState, did_you_mean, rank_suggestions};
use anyhow::Result;
use hyper::Method;
use serde_json::Value;
use tracing::{debug, info};

use super::AppContext;
use super::helpers::{flag, format_fields, indent_lines, parse_port, sandbox_path, save_doctor_bundle};
use crate::cli::{LeaseCommand, SandboxCommand, SandboxNewArgs};
use crate::hints::{known_profiles, profile_hint, wrap_sandbox_not_found, wrap_unknown_profile};
use crate::output::{Table, format_timestamp, or_dash};
use crate::transport::{Client, api_path};

pub async fn run(app: &AppContext, cmd: SandboxCommand) -> Result<()> {
    match cmd {
        SandboxCommand::New(args) => new(app, args).await,
        SandboxCommand::List => list(app).await,
        SandboxCommand::Show { vmid } => show(app, vmid).await,
        SandboxCommand::Start { vmid } => lifecycle(app, vmid, "start", None).await,
        SandboxCommand::Pause { vmid } => lifecycle(app, vmid, "pause", None).await,
        SandboxCommand::Resume { vmid } => lifecycle(app, vmid, "resume", None).await,
        SandboxCommand::Stop { all: true, force, .. } => stop_all(app, force).await,
        SandboxCommand::Stop { vmid, force, .. } => {
            let vmid = vmid.ok_or_else(|| CliError::usage("stop needs a VMID or --all"))?;
            lifecycle(app, vmid, "stop", Some(ForceRequest { force })).await
        }
        SandboxCommand::Revert {
            vmid,
            no_restart,
            force,
        } => revert(app, vmid, no_restart, force).await,
        SandboxCommand::Destroy { vmid, force } => {
            app.confirm(&format!("destroy sandbox {vmid}"), force)?;
            lifecycle(app, vmid, "destroy", Some(ForceRequest { force: true })).await
        }
        SandboxCommand::Lease(LeaseCommand::Renew { vmid, ttl }) => renew(app, vmid, ttl).await,
        SandboxCommand::Prune { force } => prune(app, force).await,
        SandboxCommand::Expose { vmid, port, force } => expose(app, vmid, &port, force).await,
        SandboxCommand::Unexpose { name } => unexpose(app, &name).await,
        SandboxCommand::Exposures => exposures(app).await,
        SandboxCommand::Doctor { vmid, doctor } => {
            let client = app.api()?;
            let path = sandbox_path(vmid, &["doctor"])?;
            let response = match client.open_stream(&app.ctx, Method::POST, &path).await {
                Ok(r) => r,
                Err(e) => return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await),
            };
            save_doctor_bundle(app, response, "sandbox", &vmid.to_string(), doctor.out.as_deref())
                .await
        }
    }
}

// =============================================================================
// Profile modifiers
// =============================================================================

const MODIFIER_ALIASES: &[(&str, &str)] = &[
    ("secure", "secure"),
    ("sec", "secure"),
    ("locked", "secure"),
    ("small", "small"),
    ("sm", "small"),
    ("medium", "medium"),
    ("md", "medium"),
    ("large", "large"),
    ("lg", "large"),
    ("yolo", "yolo"),
    ("gpu", "gpu"),
    ("interactive", "interactive"),
    ("dev", "interactive"),
];

/// Canonical, deduplicated modifier tokens in the order given.
pub fn canonical_modifiers(tokens: &[String]) -> Result<Vec<&'static str>, CliError> {
    let mut out: Vec<&'static str> = Vec::new();
    for raw in tokens {
        let Some(token) = raw.trim().strip_prefix('+') else {
            return Err(CliError::usage(format!(
                "unexpected argument {raw:?}: modifiers start with '+', e.g. +secure"
            ))
            .with_next("use --profile <name> to pick a profile by name"));
        };
        let token = token.to_ascii_lowercase();
        match MODIFIER_ALIASES.iter().find(|(alias, _)| *alias == token) {
            Some((_, canonical)) => {
                if !out.contains(canonical) {
                    out.push(*canonical);
                }
            }
            None => {
                let aliases: Vec<String> =
                    MODIFIER_ALIASES.iter().map(|(a, _)| format!("+{a}")).collect();
                let mut err = CliError::usage(format!("unknown modifier {raw:?}"));
                if let Some(hint) = did_you_mean(&rank_suggestions(&format!("+{token}"), &aliases, 3))
                {
                    err = err.with_hint(hint);
                }
                return Err(err);
            }
        }
    }
    if out.is_empty() {
        return Err(CliError::usage("sandbox new needs --profile or at least one +modifier"));
    }
    Ok(out)
}

/// Every ordering of `items`, starting with the given order.
fn permutations<'a>(items: &[&'a str]) -> Vec<Vec<&'a str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for (i, head) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *head);
            out.push(tail);
        }
    }
    out
}

/// Map modifier tokens onto an existing profile name.
pub fn resolve_modifiers(tokens: &[String], known: &[String]) -> Result<String, CliError> {
    let canonical = canonical_modifiers(tokens)?;
    for order in permutations(&canonical) {
        let candidate = order.join("-");
        if known.iter().any(|p| *p == candidate) {
            return Ok(candidate);
        }
    }
    let wanted = canonical.join("-");
    let mut err = CliError::not_found(format!(
        "no profile matches modifiers {}",
        canonical
            .iter()
            .map(|m| format!("+{m}"))
            .collect::<Vec<_>>()
            .join(" ")
    ))
    .with_next("run `agentlab profile list` to see available profiles");
    if let Some(hint) = profile_hint(&wanted, known) {
        err = err.with_hint(hint);
    }
    Err(err)
}

// =============================================================================
// Handlers
// =============================================================================

fn print_sandbox(sb: &Sandbox) {
    println!("sandbox {} {}", sb.vmid, sb.state);
    if !sb.name.is_empty() {
        println!("  name:      {}", sb.name);
    }
    println!("  profile:   {}", sb.profile);
    println!("  ip:        {}", if sb.ip.is_empty() { "-" } else { sb.ip.as_str() });
    println!("  workspace: {}", or_dash(sb.workspace_id.as_deref()));
    println!("  keepalive: {}", sb.keepalive);
    println!("  lease:     {}", format_timestamp(sb.lease_expires_at.as_deref()));
    if let Some(net) = &sb.network {
        println!("  network:   {}", net.mode);
    }
    println!("  created:   {}", format_timestamp(sb.created_at.as_deref()));
}

async fn new(app: &AppContext, args: SandboxNewArgs) -> Result<()> {
    let client = app.api()?;
    let profile = match &args.profile {
        Some(p) if !p.trim().is_empty() => p.trim().to_string(),
        _ => {
            canonical_modifiers(&args.modifiers)?;
            let known = known_profiles(&client, &app.ctx).await;
            let resolved = resolve_modifiers(&args.modifiers, &known)?;
            info!("modifiers {:?} resolved to profile {}", args.modifiers, resolved);
            resolved
        }
    };

    let request = SandboxCreateRequest {
        name: args.name.filter(|n| !n.trim().is_empty()),
        profile: profile.clone(),
        keepalive: flag(args.keepalive),
        ttl_minutes: args.ttl,
        workspace_id: args.workspace.filter(|w| !w.trim().is_empty()),
    };
    let sandbox: Sandbox = match client.post(&app.ctx, "/v1/sandboxes", &request).await {
        Ok(sb) => sb,
        Err(e) => return Err(wrap_unknown_profile(&client, &app.ctx, &profile, e).await),
    };
    app.out.render(&sandbox, || print_sandbox(&sandbox))
}

async fn list(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let resp: SandboxesResponse = client.get(&app.ctx, "/v1/sandboxes").await?;
    app.out.render(&resp, || {
        if resp.sandboxes.is_empty() {
            println!("no sandboxes");
            return;
        }
        let mut table = Table::new(["VMID", "NAME", "PROFILE", "STATE", "IP", "LEASE"]);
        for sb in &resp.sandboxes {
            table.row([
                sb.vmid.to_string(),
                sb.name.clone(),
                sb.profile.clone(),
                sb.state.to_string(),
                if sb.ip.is_empty() { "-".to_string() } else { sb.ip.clone() },
                format_timestamp(sb.lease_expires_at.as_deref()),
            ]);
        }
        table.print();
    })
}

async fn fetch(client: &Client, app: &AppContext, vmid: u32) -> Result<Sandbox> {
    let path = sandbox_path(vmid, &[])?;
    match client.get(&app.ctx, &path).await {
        Ok(sb) => Ok(sb),
        Err(e) => Err(wrap_sandbox_not_found(client, &app.ctx, vmid, e).await),
    }
}

async fn show(app: &AppContext, vmid: u32) -> Result<()> {
    let client = app.api()?;
    let sandbox = fetch(&client, app, vmid).await?;
    app.out.render(&sandbox, || print_sandbox(&sandbox))
}

/// POST `/v1/sandboxes/{vmid}/{action}` and report the daemon's answer.
async fn lifecycle(
    app: &AppContext,
    vmid: u32,
    action: &str,
    body: Option<ForceRequest>,
) -> Result<()> {
    let client = app.api()?;
    let path = sandbox_path(vmid, &[action])?;
    let result = match &body {
        Some(body) => client.post::<_, Value>(&app.ctx, &path, body).await,
        None => client.post_empty::<Value>(&app.ctx, &path).await,
    };
    let value = match result {
        Ok(v) => v,
        Err(e) => return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await),
    };
    debug!("sandbox {} {}: {}", vmid, action, value);
    app.out.render(&value, || {
        match value.get("state").and_then(Value::as_str) {
            Some(state) => println!("sandbox {vmid} {state}"),
            None => println!("sandbox {vmid}: {action} requested"),
        }
    })
}

async fn stop_all(app: &AppContext, force: bool) -> Result<()> {
    app.confirm("stop all sandboxes", force)?;
    let client = app.api()?;
    let resp: StopAllResponse = client
        .post(&app.ctx, "/v1/sandboxes/stop_all", &ForceRequest { force })
        .await?;
    app.out.render(&resp, || {
        println!("stop-all complete");
        println!(
            "total={} stopped={} skipped={} failed={}",
            resp.total, resp.stopped, resp.skipped, resp.failed
        );
        for item in &resp.results {
            let label = match item.result {
                StopAllOutcome::Stopped => continue,
                StopAllOutcome::Skipped => "skipped",
                StopAllOutcome::Failed => "failed",
            };
            let mut line = format!("{label}: vmid={}", item.vmid);
            if let Some(state) = &item.state {
                line.push_str(&format!(" state={state}"));
            }
            if let Some(error) = &item.error {
                line.push_str(&format!(" error={error}"));
            }
            println!("{line}");
        }
    })?;
    if resp.failed > 0 {
        app.out
            .warn(format!("{} sandbox(es) failed to stop", resp.failed));
    }
    Ok(())
}

async fn revert(app: &AppContext, vmid: u32, no_restart: bool, force: bool) -> Result<()> {
    if !force {
        let client = app.api()?;
        let sandbox = fetch(&client, app, vmid).await?;
        if matches!(sandbox.state, SandboxState::Running | SandboxState::Ready) {
            app.confirm(&format!("revert {} sandbox {vmid}", sandbox.state), false)?;
        }
    }
    let client = app.api()?;
    let path = sandbox_path(vmid, &["revert"])?;
    let body = RevertRequest {
        force,
        restart: no_restart.then_some(false),
    };
    let value: Value = match client.post(&app.ctx, &path, &body).await {
        Ok(v) => v,
        Err(e) => return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await),
    };
    app.out.render(&value, || {
        println!("sandbox {vmid} reverted");
        let fields = format_fields(&value);
        if !fields.is_empty() {
            println!("{}", indent_lines(&fields, "  "));
        }
    })
}

async fn renew(app: &AppContext, vmid: u32, ttl: u32) -> Result<()> {
    if ttl == 0 {
        return Err(CliError::usage("--ttl must be greater than zero").into());
    }
    let client = app.api()?;
    let path = sandbox_path(vmid, &["lease", "renew"])?;
    let value: Value = match client
        .post(&app.ctx, &path, &LeaseRenewRequest { ttl_minutes: ttl })
        .await
    {
        Ok(v) => v,
        Err(e) => return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await),
    };
    app.out.render(&value, || {
        let until = value.get("lease_expires_at").and_then(Value::as_str);
        println!(
            "sandbox {vmid} lease renewed until {}",
            format_timestamp(until)
        );
    })
}

async fn prune(app: &AppContext, force: bool) -> Result<()> {
    app.confirm("prune expired sandboxes", force)?;
    let client = app.api()?;
    let resp: PruneResponse = client.post_empty(&app.ctx, "/v1/sandboxes/prune").await?;
    app.out.render(&resp, || {
        if resp.count == 0 {
            println!("nothing to prune");
        } else {
            let vmids: Vec<String> = resp.vmids.iter().map(u32::to_string).collect();
            println!("pruned {} sandbox(es): {}", resp.count, vmids.join(", "));
        }
    })
}

async fn expose(app: &AppContext, vmid: u32, port: &str, force: bool) -> Result<()> {
    let port = parse_port(port)?;
    app.confirm(&format!("expose sandbox {vmid} port {port}"), force)?;
    let client = app.api()?;
    let request = ExposureCreateRequest {
        name: Exposure::name_for(vmid, port),
        vmid,
        port,
        force,
    };
    let exposure: Exposure = match client.post(&app.ctx, "/v1/exposures", &request).await {
        Ok(e) => e,
        Err(e) => return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await),
    };
    app.out.render(&exposure, || {
        println!("exposed {} ({}:{})", exposure.name, exposure.target_ip, exposure.port);
        if !exposure.url.is_empty() {
            println!("  url:   {}", exposure.url);
        }
        if !exposure.state.is_empty() {
            println!("  state: {}", exposure.state);
        }
    })
}

async fn unexpose(app: &AppContext, name: &str) -> Result<()> {
    let client = app.api()?;
    let path = api_path("/v1/exposures", &[name])?;
    client.delete(&app.ctx, &path).await.map_err(|e| {
        if e.is_not_found() {
            CliError::not_found(format!("exposure {name:?} not found"))
                .with_next("run `agentlab sandbox exposures`")
                .into()
        } else {
            anyhow::Error::from(e)
        }
    })?;
    app.out.render(&serde_json::json!({ "name": name, "removed": true }), || {
        println!("removed exposure {name}")
    })
}

async fn exposures(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let resp: ExposuresResponse = client.get(&app.ctx, "/v1/exposures").await?;
    app.out.render(&resp, || {
        if resp.exposures.is_empty() {
            println!("no exposures");
            return;
        }
        let mut table = Table::new(["NAME", "VMID", "PORT", "TARGET", "URL", "STATE"]);
        for e in &resp.exposures {
            table.row([
                e.name.clone(),
                e.vmid.to_string(),
                e.port.to_string(),
                e.target_ip.clone(),
                e.url.clone(),
                e.state.clone(),
            ]);
        }
        table.print();
    })
}
