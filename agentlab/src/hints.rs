//! Not-found enrichment: turn bare daemon errors into errors with a next
//! step and suggestions.

use agentlab_common::protocol::{ProfilesResponse, SandboxesResponse};
use agentlab_common::suggest::did_you_mean;
use agentlab_common::{CliError, closest_vmids, rank_suggestions};
use tracing::debug;

use crate::context::RequestContext;
use crate::transport::{ApiError, Client};

const SUGGESTION_LIMIT: usize = 3;

/// Best-effort list of known VMIDs; failures yield an empty list.
async fn known_vmids(client: &Client, ctx: &RequestContext) -> Vec<u32> {
    match client
        .get::<SandboxesResponse>(ctx, "/v1/sandboxes")
        .await
    {
        Ok(resp) => resp.sandboxes.into_iter().map(|s| s.vmid).collect(),
        Err(e) => {
            debug!("could not list sandboxes for hints: {}", e);
            Vec::new()
        }
    }
}

pub async fn known_profiles(client: &Client, ctx: &RequestContext) -> Vec<String> {
    match client.get::<ProfilesResponse>(ctx, "/v1/profiles").await {
        Ok(resp) => resp.profiles.into_iter().map(|p| p.name).collect(),
        Err(e) => {
            debug!("could not list profiles for hints: {}", e);
            Vec::new()
        }
    }
}

pub fn vmid_hint(vmid: u32, known: &[u32]) -> Option<String> {
    let closest = closest_vmids(vmid, known, SUGGESTION_LIMIT);
    if closest.is_empty() {
        return None;
    }
    let list: Vec<String> = closest.iter().map(u32::to_string).collect();
    Some(format!("closest VMIDs: {}", list.join(", ")))
}

pub async fn wrap_sandbox_not_found(
    client: &Client,
    ctx: &RequestContext,
    vmid: u32,
    err: ApiError,
) -> anyhow::Error {
    if !err.is_not_found() {
        return err.into();
    }
    let known = known_vmids(client, ctx).await;
    let mut cli = CliError::not_found(format!("sandbox {vmid} not found"))
        .with_next("run `agentlab sandbox list` to see available sandboxes");
    if let Some(hint) = vmid_hint(vmid, &known) {
        cli = cli.with_hint(hint);
    }
    cli.into()
}

fn is_unknown_profile(err: &ApiError) -> bool {
    match err {
        ApiError::Status { message, .. } => {
            let lower = message.to_lowercase();
            lower.contains("profile") && (lower.contains("unknown") || lower.contains("not found"))
        }
        _ => false,
    }
}

pub fn profile_hint(profile: &str, known: &[String]) -> Option<String> {
    did_you_mean(&rank_suggestions(profile, known, SUGGESTION_LIMIT))
}

pub async fn wrap_unknown_profile(
    client: &Client,
    ctx: &RequestContext,
    profile: &str,
    err: ApiError,
) -> anyhow::Error {
    if !is_unknown_profile(&err) {
        return err.into();
    }
    let known = known_profiles(client, ctx).await;
    let mut cli = CliError::not_found(format!("unknown profile {profile:?}"))
        .with_next("run `agentlab profile list` to see available profiles");
    if let Some(hint) = profile_hint(profile, &known) {
        cli = cli.with_hint(hint);
    }
    cli.into()
}

fn wrap_named_not_found(kind: &str, id: &str, err: ApiError, hint: &str, list: &str) -> anyhow::Error {
    if !err.is_not_found() {
        return err.into();
    }
    CliError::not_found(format!("{kind} {id:?} not found"))
        .with_next(format!("run `agentlab {list}`"))
        .with_hint(hint)
        .into()
}

pub fn wrap_workspace_not_found(id: &str, err: ApiError) -> anyhow::Error {
    wrap_named_not_found(
        "workspace",
        id,
        err,
        "check workspace id or name",
        "workspace list",
    )
}

pub fn wrap_job_not_found(id: &str, err: ApiError) -> anyhow::Error {
    wrap_named_not_found("job", id, err, "check the job id", "job list")
}

pub fn wrap_session_not_found(id: &str, err: ApiError) -> anyhow::Error {
    wrap_named_not_found(
        "session",
        id,
        err,
        "check session id or name",
        "session list",
    )
}
