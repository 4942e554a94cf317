//! `agentlab session`.

use agentlab_common::Session;
use agentlab_common::protocol::{SessionCreateRequest, SessionForkRequest, SessionsResponse};
use agentlab_common::CliError;
use anyhow::Result;
use hyper::Method;
use serde_json::Value;

use super::AppContext;
use super::helpers::{format_fields, indent_lines, save_doctor_bundle};
use super::job::{WorkspaceSelection, implicit_workspace};
use crate::cli::{SessionCommand, WorkspaceSelectArgs};
use crate::hints::{wrap_session_not_found, wrap_unknown_profile, wrap_workspace_not_found};
use crate::output::{Table, format_timestamp, or_dash};
use crate::transport::{ApiError, api_path};

pub async fn run(app: &AppContext, cmd: SessionCommand) -> Result<()> {
    match cmd {
        SessionCommand::Create {
            name,
            profile,
            branch,
            workspace,
        } => create(app, name, profile, branch, &workspace).await,
        SessionCommand::List => list(app).await,
        SessionCommand::Show { session } => show(app, &session).await,
        SessionCommand::Resume { session } => action(app, &session, "resume").await,
        SessionCommand::Stop { session } => action(app, &session, "stop").await,
        SessionCommand::Fork {
            session,
            name,
            workspace,
        } => fork(app, &session, name, &workspace).await,
        SessionCommand::Doctor { session, doctor } => {
            let client = app.api()?;
            let path = session_path(&session, &["doctor"])?;
            let response = client
                .open_stream(&app.ctx, Method::POST, &path)
                .await
                .map_err(|e| wrap_session_not_found(&session, e))?;
            save_doctor_bundle(app, response, "session", &session, doctor.out.as_deref()).await
        }
    }
}

fn session_path(session: &str, rest: &[&str]) -> Result<String, ApiError> {
    let mut segments = vec![session];
    segments.extend_from_slice(rest);
    api_path("/v1/sessions", &segments)
}

fn print_session(s: &Session) {
    println!("session {} ({})", s.name, s.id);
    println!("  profile:   {}", s.profile);
    println!("  workspace: {}", s.workspace_id);
    println!("  sandbox:   {}", or_dash(s.current_vmid));
    if let Some(branch) = &s.branch {
        println!("  branch:    {branch}");
    }
    println!("  created:   {}", format_timestamp(s.created_at.as_deref()));
}

async fn create(
    app: &AppContext,
    name: String,
    profile: String,
    branch: Option<String>,
    workspace: &WorkspaceSelectArgs,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CliError::usage("--name must not be empty").into());
    }
    let name = name.trim().to_string();
    let (workspace_id, workspace_create) = match WorkspaceSelection::from_args(workspace, true)? {
        WorkspaceSelection::None => (None, Some(implicit_workspace(&name, workspace)?)),
        other => other.into_fields(),
    };
    let request = SessionCreateRequest {
        name,
        profile: profile.trim().to_string(),
        branch: branch.filter(|b| !b.trim().is_empty()),
        workspace_id,
        workspace_create,
    };

    let client = app.api()?;
    let session: Session = match client.post(&app.ctx, "/v1/sessions", &request).await {
        Ok(s) => s,
        Err(e) => {
            if let Some(ws) = request.workspace_id.as_deref()
                && e.is_not_found()
                && e.to_string().contains("workspace")
            {
                return Err(wrap_workspace_not_found(ws, e));
            }
            return Err(wrap_unknown_profile(&client, &app.ctx, &request.profile, e).await);
        }
    };
    app.out.render(&session, || print_session(&session))
}

async fn list(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let resp: SessionsResponse = client.get(&app.ctx, "/v1/sessions").await?;
    app.out.render(&resp, || {
        if resp.sessions.is_empty() {
            println!("no sessions");
            return;
        }
        let mut table = Table::new(["ID", "NAME", "PROFILE", "WORKSPACE", "VMID", "BRANCH"]);
        for s in &resp.sessions {
            table.row([
                s.id.clone(),
                s.name.clone(),
                s.profile.clone(),
                s.workspace_id.clone(),
                or_dash(s.current_vmid),
                or_dash(s.branch.as_deref()),
            ]);
        }
        table.print();
    })
}

async fn show(app: &AppContext, session: &str) -> Result<()> {
    let client = app.api()?;
    let path = session_path(session, &[])?;
    let s: Session = client
        .get(&app.ctx, &path)
        .await
        .map_err(|e| wrap_session_not_found(session, e))?;
    app.out.render(&s, || print_session(&s))
}

/// Resume or stop. The daemon answers with the session or a status object.
async fn action(app: &AppContext, session: &str, verb: &str) -> Result<()> {
    let client = app.api()?;
    let path = session_path(session, &[verb])?;
    let value: Value = client
        .post_empty(&app.ctx, &path)
        .await
        .map_err(|e| wrap_session_not_found(session, e))?;
    app.out.render(&value, || {
        match serde_json::from_value::<Session>(value.clone()) {
            Ok(s) => {
                println!("session {} {}", s.name, if verb == "resume" { "resumed" } else { "stopped" });
                print_session(&s);
            }
            Err(_) => {
                println!("session {session}: {verb} requested");
                let fields = format_fields(&value);
                if !fields.is_empty() {
                    println!("{}", indent_lines(&fields, "  "));
                }
            }
        }
    })
}

async fn fork(
    app: &AppContext,
    session: &str,
    name: String,
    workspace: &WorkspaceSelectArgs,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CliError::usage("--name must not be empty").into());
    }
    let (workspace_id, workspace_create) =
        WorkspaceSelection::from_args(workspace, false)?.into_fields();
    let request = SessionForkRequest {
        name: name.trim().to_string(),
        workspace_id,
        workspace_create,
    };
    let client = app.api()?;
    let path = session_path(session, &["fork"])?;
    let forked: Session = client
        .post(&app.ctx, &path, &request)
        .await
        .map_err(|e| wrap_session_not_found(session, e))?;
    app.out.render(&forked, || {
        println!("forked session {session} into {}", forked.name);
        print_session(&forked);
    })
}
