//! `agentlab job`: submit, validate, inspect, artifacts, doctor.
//!
//! `job run --branch B` is the one composite flow here: it finds or creates
//! the session `branch-<slug(B)>` (with an inline workspace) and then
//! submits the job into that session's workspace.

use agentlab_common::endpoint::Query;
use agentlab_common::protocol::{
    ArtifactsResponse, DEFAULT_STATEFUL_WORKSPACE_SIZE_GB, DEFAULT_STATEFUL_WORKSPACE_STORAGE,
    JobCreateRequest, JobsResponse, SessionCreateRequest, ValidatePlanResponse,
    WorkspaceCreateRequest,
};
use agentlab_common::util::{branch_session_name, parse_size_gb, repo_workspace_name};
use agentlab_common::{CliError, Job, Session, Workspace};
use anyhow::Result;
use hyper::Method;
use tracing::{debug, info};

use super::helpers::{flag, report_download, save_doctor_bundle};
use super::{AppContext, SilentExit};
use crate::artifacts::{Selector, resolve_artifact_out_path, stream_to_file};
use crate::cli::{ArtifactsCommand, JobCommand, JobRunArgs, WorkspaceSelectArgs};
use crate::hints::{
    wrap_job_not_found, wrap_session_not_found, wrap_unknown_profile, wrap_workspace_not_found,
};
use crate::output::{Table, format_timestamp, or_dash};
use crate::tail::format_event;
use crate::transport::{Client, api_path};

pub async fn run(app: &AppContext, cmd: JobCommand) -> Result<()> {
    match cmd {
        JobCommand::Run(args) => job_run(app, args).await,
        JobCommand::Validate(args) => job_validate(app, args).await,
        JobCommand::List { limit } => job_list(app, limit).await,
        JobCommand::Show { id, events_tail } => job_show(app, &id, events_tail).await,
        JobCommand::Artifacts(ArtifactsCommand::List { id }) => artifacts_list(app, &id).await,
        JobCommand::Artifacts(ArtifactsCommand::Download {
            id,
            path,
            name,
            bundle,
            latest,
            out,
        }) => {
            let selector = Selector::from_flags(path, name, bundle, latest)?;
            artifacts_download(app, &id, &selector, out.as_deref()).await
        }
        JobCommand::Doctor { id, doctor } => job_doctor(app, &id, doctor.out.as_deref()).await,
    }
}

// =============================================================================
// Workspace selection
// =============================================================================

/// Which workspace a job or session should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceSelection {
    None,
    /// Existing workspace id or name.
    Existing(String),
    Create(WorkspaceCreateRequest),
}

fn stateful_default(name: String, size_gb: u32, storage: Option<String>) -> WorkspaceCreateRequest {
    WorkspaceCreateRequest {
        name,
        size_gb,
        storage: Some(storage.unwrap_or_else(|| DEFAULT_STATEFUL_WORKSPACE_STORAGE.to_string())),
    }
}

impl WorkspaceSelection {
    /// Validate the mutually exclusive workspace flags.
    ///
    /// `allow_bare_overrides` lets `--workspace-size`/`--workspace-storage`
    /// stand alone, tuning an implicitly created workspace.
    pub fn from_args(args: &WorkspaceSelectArgs, allow_bare_overrides: bool) -> Result<Self, CliError> {
        let size = args
            .workspace_size
            .as_deref()
            .map(parse_size_gb)
            .transpose()
            .map_err(CliError::usage)?;

        match (&args.workspace, &args.workspace_create) {
            (Some(_), Some(_)) => Err(CliError::usage(
                "--workspace and --workspace-create are mutually exclusive",
            )),
            (Some(w), None) => match w.strip_prefix("new:") {
                Some(name) if name.trim().is_empty() => {
                    Err(CliError::usage("--workspace new:<name> needs a name"))
                }
                Some(name) => Ok(Self::Create(stateful_default(
                    name.trim().to_string(),
                    size.unwrap_or(DEFAULT_STATEFUL_WORKSPACE_SIZE_GB),
                    args.workspace_storage.clone(),
                ))),
                None if size.is_some() || args.workspace_storage.is_some() => Err(CliError::usage(
                    "--workspace-size and --workspace-storage only apply to a new workspace",
                )),
                None => Ok(Self::Existing(w.trim().to_string())),
            },
            (None, Some(name)) => {
                let size_gb = size.ok_or_else(|| {
                    CliError::usage("--workspace-create requires --workspace-size")
                        .with_hint("e.g. --workspace-size 80G")
                })?;
                Ok(Self::Create(WorkspaceCreateRequest {
                    name: name.trim().to_string(),
                    size_gb,
                    storage: args.workspace_storage.clone(),
                }))
            }
            (None, None) if !allow_bare_overrides
                && (size.is_some() || args.workspace_storage.is_some()) =>
            {
                Err(CliError::usage(
                    "--workspace-size and --workspace-storage require --workspace-create",
                ))
            }
            (None, None) => Ok(Self::None),
        }
    }

    pub fn into_fields(self) -> (Option<String>, Option<WorkspaceCreateRequest>) {
        match self {
            Self::None => (None, None),
            Self::Existing(id) => (Some(id), None),
            Self::Create(req) => (None, Some(req)),
        }
    }
}

/// Workspace created alongside a session when none was named, sized by
/// `--workspace-size`/`--workspace-storage` if given.
pub fn implicit_workspace(
    name: &str,
    overrides: &WorkspaceSelectArgs,
) -> Result<WorkspaceCreateRequest, CliError> {
    let size = overrides
        .workspace_size
        .as_deref()
        .map(parse_size_gb)
        .transpose()
        .map_err(CliError::usage)?;
    Ok(stateful_default(
        name.to_string(),
        size.unwrap_or(DEFAULT_STATEFUL_WORKSPACE_SIZE_GB),
        overrides.workspace_storage.clone(),
    ))
}

/// Session creation body for a branch run.
pub fn branch_session_request(
    branch: &str,
    profile: &str,
    selection: WorkspaceSelection,
    overrides: &WorkspaceSelectArgs,
) -> Result<SessionCreateRequest, CliError> {
    let name = branch_session_name(branch).ok_or_else(|| {
        CliError::usage(format!("--branch {branch:?} has no usable characters"))
    })?;
    let (workspace_id, workspace_create) = match selection {
        WorkspaceSelection::None => (None, Some(implicit_workspace(&name, overrides)?)),
        other => other.into_fields(),
    };
    Ok(SessionCreateRequest {
        name,
        profile: profile.to_string(),
        branch: Some(branch.to_string()),
        workspace_id,
        workspace_create,
    })
}

fn base_request(args: &JobRunArgs) -> JobCreateRequest {
    JobCreateRequest {
        repo_url: args.repo.trim().to_string(),
        git_ref: args.git_ref.clone(),
        profile: args.profile.trim().to_string(),
        task: args.task.clone(),
        mode: args.mode.clone(),
        ttl_minutes: args.ttl,
        keepalive: flag(args.keepalive),
        ..Default::default()
    }
}

fn require_fields(args: &JobRunArgs) -> Result<(), CliError> {
    for (flag, value) in [
        ("--repo", &args.repo),
        ("--profile", &args.profile),
        ("--task", &args.task),
    ] {
        if value.trim().is_empty() {
            return Err(CliError::usage(format!("{flag} must not be empty")));
        }
    }
    Ok(())
}

/// Reuse the repo's workspace when it exists, else create it inline.
async fn stateful_selection(
    client: &Client,
    app: &AppContext,
    args: &JobRunArgs,
) -> Result<WorkspaceSelection> {
    let name = repo_workspace_name(&args.repo).ok_or_else(|| {
        CliError::usage(format!(
            "cannot derive a workspace name from {:?}; pass --workspace",
            args.repo
        ))
    })?;
    let path = api_path("/v1/workspaces", &[&name])?;
    match client.get::<Workspace>(&app.ctx, &path).await {
        Ok(ws) => {
            debug!("stateful run reuses workspace {} ({})", ws.name, ws.id);
            Ok(WorkspaceSelection::Existing(ws.id))
        }
        Err(e) if e.is_not_found() => Ok(WorkspaceSelection::Create(implicit_workspace(
            &name,
            &args.workspace,
        )?)),
        Err(e) => Err(e.into()),
    }
}

/// Find the branch session or create it.
async fn ensure_branch_session(
    client: &Client,
    app: &AppContext,
    request: SessionCreateRequest,
) -> Result<Session> {
    let path = api_path("/v1/sessions", &[&request.name])?;
    match client.get::<Session>(&app.ctx, &path).await {
        Ok(session) => {
            if session.profile != request.profile {
                app.out.warn(format!(
                    "session {} uses profile {}, not {}",
                    session.name, session.profile, request.profile
                ));
            }
            Ok(session)
        }
        Err(e) if e.is_not_found() => {
            info!("creating session {}", request.name);
            match client.post(&app.ctx, "/v1/sessions", &request).await {
                Ok(session) => Ok(session),
                Err(e) => Err(wrap_unknown_profile(client, &app.ctx, &request.profile, e).await),
            }
        }
        Err(e) => Err(wrap_session_not_found(&request.name, e)),
    }
}

async fn job_run(app: &AppContext, args: JobRunArgs) -> Result<()> {
    require_fields(&args)?;
    let branch = args.branch.as_deref().map(str::trim).filter(|b| !b.is_empty());
    let selection = WorkspaceSelection::from_args(&args.workspace, branch.is_some() || args.stateful)?;
    let client = app.api()?;
    let mut request = base_request(&args);

    if let Some(branch) = branch {
        let session_req =
            branch_session_request(branch, &request.profile, selection, &args.workspace)?;
        let session = ensure_branch_session(&client, app, session_req).await?;
        request.workspace_id = Some(session.workspace_id.clone());
        request.session_id = Some(session.id.clone());
    } else {
        let selection = match selection {
            WorkspaceSelection::None if args.stateful => {
                stateful_selection(&client, app, &args).await?
            }
            other => other,
        };
        let (workspace_id, workspace_create) = selection.into_fields();
        request.workspace_id = workspace_id;
        request.workspace_create = workspace_create;
    }

    let job: Job = match client.post(&app.ctx, "/v1/jobs", &request).await {
        Ok(job) => job,
        Err(e) => {
            if let Some(ws) = request.workspace_id.as_deref()
                && e.is_not_found()
                && e.to_string().to_lowercase().contains("workspace")
            {
                return Err(wrap_workspace_not_found(ws, e));
            }
            return Err(wrap_unknown_profile(&client, &app.ctx, &request.profile, e).await);
        }
    };
    app.out.render(&job, || print_job(&job))
}

async fn job_validate(app: &AppContext, args: JobRunArgs) -> Result<()> {
    require_fields(&args)?;
    let selection = WorkspaceSelection::from_args(&args.workspace, false)?;
    let mut request = base_request(&args);
    let (workspace_id, workspace_create) = selection.into_fields();
    request.workspace_id = workspace_id;
    request.workspace_create = workspace_create;

    let client = app.api()?;
    let resp: ValidatePlanResponse = client
        .post(&app.ctx, "/v1/jobs/validate-plan", &request)
        .await?;
    app.out.render(&resp, || {
        println!("{}", if resp.ok { "ok" } else { "invalid" });
        for e in &resp.errors {
            println!("error: {e}");
        }
        for w in &resp.warnings {
            println!("warning: {w}");
        }
    })?;
    if resp.ok {
        Ok(())
    } else {
        Err(SilentExit(1).into())
    }
}

async fn job_list(app: &AppContext, limit: Option<u32>) -> Result<()> {
    let client = app.api()?;
    let path = Query::new().push_opt("limit", limit).apply("/v1/jobs");
    let resp: JobsResponse = client.get(&app.ctx, &path).await?;
    app.out.render(&resp, || {
        if resp.jobs.is_empty() {
            println!("no jobs");
            return;
        }
        let mut table = Table::new(["ID", "STATUS", "PROFILE", "VMID", "REPO", "CREATED"]);
        for job in &resp.jobs {
            table.row([
                job.id.clone(),
                job.status.to_string(),
                job.profile.clone(),
                or_dash(job.sandbox_vmid),
                job.repo_url.clone(),
                format_timestamp(job.created_at.as_deref()),
            ]);
        }
        table.print();
    })
}

fn print_job(job: &Job) {
    println!("job {} {}", job.id, job.status);
    println!("  repo:      {}", job.repo_url);
    if !job.git_ref.is_empty() {
        println!("  ref:       {}", job.git_ref);
    }
    println!("  profile:   {}", job.profile);
    println!("  task:      {}", job.task);
    if !job.mode.is_empty() {
        println!("  mode:      {}", job.mode);
    }
    println!("  sandbox:   {}", or_dash(job.sandbox_vmid));
    if let Some(ws) = &job.workspace_id {
        println!("  workspace: {ws}");
    }
    if let Some(session) = &job.session_id {
        println!("  session:   {session}");
    }
    println!("  created:   {}", format_timestamp(job.created_at.as_deref()));
    if let Some(result) = &job.result {
        println!("  result:    {result}");
    }
}

async fn job_show(app: &AppContext, id: &str, events_tail: Option<u32>) -> Result<()> {
    let client = app.api()?;
    let path = Query::new()
        .push_opt("events_tail", events_tail)
        .apply(&api_path("/v1/jobs", &[id])?);
    let job: Job = client
        .get(&app.ctx, &path)
        .await
        .map_err(|e| wrap_job_not_found(id, e))?;
    app.out.render(&job, || {
        print_job(&job);
        if let Some(events) = job.events.as_ref().filter(|e| !e.is_empty()) {
            println!("events:");
            for event in events {
                println!("  {}", format_event(event));
            }
        }
    })
}

// =============================================================================
// Artifacts
// =============================================================================

async fn list_artifacts(client: &Client, app: &AppContext, id: &str) -> Result<ArtifactsResponse> {
    let path = api_path("/v1/jobs", &[id, "artifacts"])?;
    client
        .get(&app.ctx, &path)
        .await
        .map_err(|e| wrap_job_not_found(id, e))
}

async fn artifacts_list(app: &AppContext, id: &str) -> Result<()> {
    let client = app.api()?;
    let resp = list_artifacts(&client, app, id).await?;
    app.out.render(&resp, || {
        if resp.artifacts.is_empty() {
            println!("job {id} has no artifacts");
            return;
        }
        let mut table = Table::new(["NAME", "PATH", "SIZE", "SHA256", "CREATED"]);
        for a in &resp.artifacts {
            table.row([
                a.name.clone(),
                a.path.clone(),
                a.size_bytes.to_string(),
                a.sha256.chars().take(12).collect::<String>(),
                format_timestamp(a.created_at.as_deref()),
            ]);
        }
        table.print();
    })
}

async fn artifacts_download(
    app: &AppContext,
    id: &str,
    selector: &Selector,
    out: Option<&str>,
) -> Result<()> {
    let client = app.api()?;
    let resp = list_artifacts(&client, app, id).await?;
    let artifact = selector.select(&resp.artifacts)?;
    debug!("selected artifact {} ({})", artifact.name, artifact.path);

    let dest = resolve_artifact_out_path(out.unwrap_or(""), &artifact.name)?;
    let path = Query::new()
        .push("path", &artifact.path)
        .apply(&api_path("/v1/jobs", &[id, "artifacts", "download"])?);
    let response = client.open_stream(&app.ctx, Method::GET, &path).await?;
    let bytes = stream_to_file(&app.ctx, response, &dest).await?;
    report_download(app, &dest, bytes)
}

async fn job_doctor(app: &AppContext, id: &str, out: Option<&str>) -> Result<()> {
    let client = app.api()?;
    let path = api_path("/v1/jobs", &[id, "doctor"])?;
    let response = client
        .open_stream(&app.ctx, Method::POST, &path)
        .await
        .map_err(|e| wrap_job_not_found(id, e))?;
    save_doctor_bundle(app, response, "job", id, out).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlab_common::ErrorKind;

    fn select(workspace: Option<&str>, create: Option<&str>, size: Option<&str>) -> WorkspaceSelectArgs {
        WorkspaceSelectArgs {
            workspace: workspace.map(str::to_string),
            workspace_create: create.map(str::to_string),
            workspace_size: size.map(str::to_string),
            workspace_storage: None,
        }
    }

    #[test]
    fn test_workspace_selection_rules() {
        assert_eq!(
            WorkspaceSelection::from_args(&select(None, None, None), false).unwrap(),
            WorkspaceSelection::None
        );
        assert_eq!(
            WorkspaceSelection::from_args(&select(Some("ws-main"), None, None), false).unwrap(),
            WorkspaceSelection::Existing("ws-main".into())
        );

        let err = WorkspaceSelection::from_args(&select(Some("a"), Some("b"), None), false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Usage);

        let err = WorkspaceSelection::from_args(&select(None, Some("b"), None), false).unwrap_err();
        assert!(err.message.contains("--workspace-size"));

        let sel = WorkspaceSelection::from_args(&select(None, Some("b"), Some("20GB")), false)
            .unwrap();
        assert_eq!(
            sel,
            WorkspaceSelection::Create(WorkspaceCreateRequest {
                name: "b".into(),
                size_gb: 20,
                storage: None
            })
        );

        assert!(WorkspaceSelection::from_args(&select(None, None, Some("20G")), false).is_err());
        assert!(WorkspaceSelection::from_args(&select(None, None, Some("20G")), true).is_ok());
    }

    #[test]
    fn test_new_prefix_creates_with_defaults() {
        let sel = WorkspaceSelection::from_args(&select(Some("new:scratch"), None, None), false)
            .unwrap();
        assert_eq!(
            sel,
            WorkspaceSelection::Create(WorkspaceCreateRequest {
                name: "scratch".into(),
                size_gb: 80,
                storage: Some("local-zfs".into())
            })
        );
        assert!(WorkspaceSelection::from_args(&select(Some("new:"), None, None), false).is_err());
    }

    #[test]
    fn test_branch_session_request() {
        let req = branch_session_request(
            "feature/login",
            "yolo",
            WorkspaceSelection::None,
            &WorkspaceSelectArgs::default(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "name": "branch-feature-login",
                "profile": "yolo",
                "branch": "feature/login",
                "workspace_create": {"name": "branch-feature-login", "size_gb": 80, "storage": "local-zfs"}
            })
        );

        let req = branch_session_request(
            "Feature/Login",
            "yolo",
            WorkspaceSelection::Existing("ws-1".into()),
            &WorkspaceSelectArgs::default(),
        )
        .unwrap();
        assert_eq!(req.workspace_id.as_deref(), Some("ws-1"));
        assert!(req.workspace_create.is_none());

        assert!(
            branch_session_request("///", "yolo", WorkspaceSelection::None, &Default::default())
                .is_err()
        );
    }

    #[test]
    fn test_branch_overrides_size() {
        let overrides = select(None, None, Some("120G"));
        let req = branch_session_request("main", "yolo", WorkspaceSelection::None, &overrides)
            .unwrap();
        assert_eq!(req.workspace_create.unwrap().size_gb, 120);
    }
}
