//! `agentlab workspace`: persistent volumes and their snapshots.

use agentlab_common::protocol::{
    SnapshotCreateRequest, SnapshotsResponse, WorkspaceAttachRequest, WorkspaceCreateRequest,
    WorkspaceForkRequest, WorkspaceFsckRequest, WorkspaceRebindRequest, WorkspacesResponse,
};
use agentlab_common::util::parse_size_gb;
use agentlab_common::{CliError, Workspace, WorkspaceSnapshot};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use super::AppContext;
use super::helpers::{flag, format_fields, indent_lines};
use crate::cli::{SnapshotCommand, WorkspaceCommand};
use crate::hints::{wrap_sandbox_not_found, wrap_unknown_profile, wrap_workspace_not_found};
use crate::output::{Table, format_timestamp, or_dash};
use crate::transport::{ApiError, api_path};

pub async fn run(app: &AppContext, cmd: WorkspaceCommand) -> Result<()> {
    match cmd {
        WorkspaceCommand::Create {
            name,
            size,
            storage,
        } => create(app, name, &size, storage).await,
        WorkspaceCommand::List => list(app).await,
        WorkspaceCommand::Show { workspace } => show(app, &workspace).await,
        WorkspaceCommand::Attach { workspace, vmid } => attach(app, &workspace, vmid).await,
        WorkspaceCommand::Detach { workspace } => {
            let value: Value = post_action(app, &workspace, "detach", None::<&()>).await?;
            report(app, &value, &format!("workspace {workspace} detached"))
        }
        WorkspaceCommand::Rebind {
            workspace,
            profile,
            ttl,
            keep_old,
        } => {
            let body = WorkspaceRebindRequest {
                profile: profile.clone(),
                ttl_minutes: ttl,
                keep_old: flag(keep_old),
            };
            let client = app.api()?;
            let path = workspace_path(&workspace, &["rebind"])?;
            let value: Value = match client.post(&app.ctx, &path, &body).await {
                Ok(v) => v,
                Err(e) if e.is_not_found() => return Err(wrap_workspace_not_found(&workspace, e)),
                Err(e) => return Err(wrap_unknown_profile(&client, &app.ctx, &profile, e).await),
            };
            report(
                app,
                &value,
                &format!("workspace {workspace} rebound to profile {profile}"),
            )
        }
        WorkspaceCommand::Fork {
            workspace,
            name,
            from_snapshot,
        } => {
            let body = WorkspaceForkRequest {
                name,
                from_snapshot,
            };
            let forked: Workspace = post_action(app, &workspace, "fork", Some(&body)).await?;
            app.out.render(&forked, || {
                println!("forked workspace {workspace} into {}", forked.name);
                print_workspace(&forked);
            })
        }
        WorkspaceCommand::Fsck {
            workspace,
            repair,
            force,
        } => {
            if repair {
                app.confirm(&format!("repair workspace {workspace}"), force)?;
            }
            let body = WorkspaceFsckRequest {
                repair: flag(repair),
            };
            let value: Value = post_action(app, &workspace, "fsck", Some(&body)).await?;
            report(app, &value, &format!("fsck {workspace}"))
        }
        WorkspaceCommand::Check { workspace } => {
            let client = app.api()?;
            let path = workspace_path(&workspace, &["check"])?;
            let value: Value = client
                .get(&app.ctx, &path)
                .await
                .map_err(|e| wrap_workspace_not_found(&workspace, e))?;
            report(app, &value, &format!("check {workspace}"))
        }
        WorkspaceCommand::Snapshot(cmd) => snapshot(app, cmd).await,
    }
}

fn workspace_path(workspace: &str, rest: &[&str]) -> Result<String, ApiError> {
    let mut segments = vec![workspace];
    segments.extend_from_slice(rest);
    api_path("/v1/workspaces", &segments)
}

/// POST `/v1/workspaces/{w}/{action}`; 404 becomes a workspace hint.
async fn post_action<B, T>(
    app: &AppContext,
    workspace: &str,
    action: &str,
    body: Option<&B>,
) -> Result<T>
where
    B: Serialize + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let client = app.api()?;
    let path = workspace_path(workspace, &[action])?;
    let result = match body {
        Some(body) => client.post(&app.ctx, &path, body).await,
        None => client.post_empty(&app.ctx, &path).await,
    };
    result.map_err(|e| wrap_workspace_not_found(workspace, e))
}

fn report(app: &AppContext, value: &Value, headline: &str) -> Result<()> {
    app.out.render(value, || {
        println!("{headline}");
        let fields = format_fields(value);
        if !fields.is_empty() {
            println!("{}", indent_lines(&fields, "  "));
        }
    })
}

fn print_workspace(ws: &Workspace) {
    println!("workspace {} ({})", ws.name, ws.id);
    println!("  size:     {}G", ws.size_gb);
    if !ws.storage.is_empty() {
        println!("  storage:  {}", ws.storage);
    }
    if !ws.volume_id.is_empty() {
        println!("  volume:   {}", ws.volume_id);
    }
    println!("  attached: {}", or_dash(ws.attached_vmid));
    println!("  created:  {}", format_timestamp(ws.created_at.as_deref()));
}

async fn create(app: &AppContext, name: String, size: &str, storage: Option<String>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CliError::usage("--name must not be empty").into());
    }
    let size_gb = parse_size_gb(size).map_err(CliError::usage)?;
    let request = WorkspaceCreateRequest {
        name: name.trim().to_string(),
        size_gb,
        storage: storage.filter(|s| !s.trim().is_empty()),
    };
    let client = app.api()?;
    let ws: Workspace = client.post(&app.ctx, "/v1/workspaces", &request).await?;
    app.out.render(&ws, || print_workspace(&ws))
}

async fn list(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let resp: WorkspacesResponse = client.get(&app.ctx, "/v1/workspaces").await?;
    app.out.render(&resp, || {
        if resp.workspaces.is_empty() {
            println!("no workspaces");
            return;
        }
        let mut table = Table::new(["ID", "NAME", "SIZE", "STORAGE", "ATTACHED", "CREATED"]);
        for ws in &resp.workspaces {
            table.row([
                ws.id.clone(),
                ws.name.clone(),
                format!("{}G", ws.size_gb),
                ws.storage.clone(),
                or_dash(ws.attached_vmid),
                format_timestamp(ws.created_at.as_deref()),
            ]);
        }
        table.print();
    })
}

async fn show(app: &AppContext, workspace: &str) -> Result<()> {
    let client = app.api()?;
    let path = workspace_path(workspace, &[])?;
    let ws: Workspace = client
        .get(&app.ctx, &path)
        .await
        .map_err(|e| wrap_workspace_not_found(workspace, e))?;
    app.out.render(&ws, || print_workspace(&ws))
}

async fn attach(app: &AppContext, workspace: &str, vmid: u32) -> Result<()> {
    let client = app.api()?;
    let path = workspace_path(workspace, &["attach"])?;
    let value: Value = match client
        .post(&app.ctx, &path, &WorkspaceAttachRequest { vmid })
        .await
    {
        Ok(v) => v,
        Err(e) if e.is_not_found() && e.to_string().contains("sandbox") => {
            return Err(wrap_sandbox_not_found(&client, &app.ctx, vmid, e).await);
        }
        Err(e) => return Err(wrap_workspace_not_found(workspace, e)),
    };
    report(
        app,
        &value,
        &format!("workspace {workspace} attached to sandbox {vmid}"),
    )
}

async fn snapshot(app: &AppContext, cmd: SnapshotCommand) -> Result<()> {
    match cmd {
        SnapshotCommand::List { workspace } => {
            let client = app.api()?;
            let path = workspace_path(&workspace, &["snapshots"])?;
            let resp: SnapshotsResponse = client
                .get(&app.ctx, &path)
                .await
                .map_err(|e| wrap_workspace_not_found(&workspace, e))?;
            app.out.render(&resp, || {
                if resp.snapshots.is_empty() {
                    println!("workspace {workspace} has no snapshots");
                    return;
                }
                let mut table = Table::new(["NAME", "CREATED"]);
                for snap in &resp.snapshots {
                    table.row([snap.name.clone(), format_timestamp(snap.created_at.as_deref())]);
                }
                table.print();
            })
        }
        SnapshotCommand::Create { workspace, name } => {
            let snap: WorkspaceSnapshot = post_action(
                app,
                &workspace,
                "snapshots",
                Some(&SnapshotCreateRequest { name }),
            )
            .await?;
            app.out.render(&snap, || {
                println!("created snapshot {} of workspace {workspace}", snap.name)
            })
        }
        SnapshotCommand::Restore {
            workspace,
            name,
            force,
        } => {
            app.confirm(
                &format!("restore workspace {workspace} to snapshot {name}"),
                force,
            )?;
            let client = app.api()?;
            let path = workspace_path(&workspace, &["snapshots", &name, "restore"])?;
            let value: Value = client
                .post_empty(&app.ctx, &path)
                .await
                .map_err(|e| wrap_workspace_not_found(&workspace, e))?;
            report(
                app,
                &value,
                &format!("workspace {workspace} restored to {name}"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_path_escapes_segments() {
        assert_eq!(workspace_path("ws-1", &[]).unwrap(), "/v1/workspaces/ws-1");
        assert_eq!(
            workspace_path("my ws", &["snapshots", "s1", "restore"]).unwrap(),
            "/v1/workspaces/my%20ws/snapshots/s1/restore"
        );
    }
}
