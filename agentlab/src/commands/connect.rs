//! `agentlab connect` / `agentlab disconnect`.

use agentlab_common::protocol::StatusResponse;
use agentlab_common::config::credentials::DEFAULT_SOCKET_PATH;
use agentlab_common::{
    ClientConfig, CliError, ConfigSource, ErrorKind, ResolvedCredentials, Sourced,
    normalize_endpoint,
};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use super::AppContext;
use crate::cli::ConnectArgs;

#[derive(Serialize)]
struct ConnectReport {
    endpoint: String,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jump_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

fn non_empty(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

pub async fn connect(app: &AppContext, args: ConnectArgs) -> Result<()> {
    let endpoint = normalize_endpoint(&args.endpoint).map_err(|e| {
        CliError::usage(e.to_string()).with_hint("pass --endpoint http[s]://host[:port]")
    })?;
    if endpoint.is_empty() {
        return Err(CliError::usage("--endpoint must not be empty").into());
    }
    let config = ClientConfig {
        endpoint: endpoint.clone(),
        token: non_empty(args.token),
        jump_host: non_empty(args.jump_host),
        jump_user: non_empty(args.jump_user),
    };

    // Verify with exactly the credentials about to be saved.
    let creds = ResolvedCredentials {
        endpoint: Sourced::new(config.endpoint.clone(), ConfigSource::Flag),
        token: Some(config.token.clone())
            .filter(|t| !t.is_empty())
            .map(|t| Sourced::new(t, ConfigSource::Flag)),
        socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        jump_host: None,
        jump_user: None,
    };
    let client = crate::transport::Client::new(&creds, app.request_timeout())?;
    let status: StatusResponse = client
        .get(&app.ctx, "/v1/status")
        .await
        .map_err(|e| {
            CliError::new(ErrorKind::Transport, format!("cannot reach {endpoint}: {e}"))
                .with_hint("verify the endpoint and token are correct")
        })?;

    let path = app.config_path()?;
    config.save(&path)?;
    info!("saved credentials for {} to {}", endpoint, path.display());

    let report = ConnectReport {
        endpoint,
        config_path: path.display().to_string(),
        jump_host: Some(config.jump_host).filter(|h| !h.is_empty()),
        version: status.version,
    };
    app.out.render(&report, || {
        println!("connected to {}", report.endpoint);
        if let Some(version) = &report.version {
            println!("  agentlabd: {version}");
        }
        if let Some(jump) = &report.jump_host {
            println!("  jump host: {jump}");
        }
        println!("  saved to:  {}", report.config_path);
    })
}

pub async fn disconnect(app: &AppContext) -> Result<()> {
    let path = app.config_path()?;
    let removed = ClientConfig::remove(&path)?;
    let report = serde_json::json!({
        "config_path": path.display().to_string(),
        "removed": removed,
    });
    app.out.render(&report, || {
        if removed {
            println!("removed {}", path.display());
        } else {
            println!("no saved credentials at {}", path.display());
        }
    })
}
