//! `agentlab status`.

use agentlab_common::protocol::{HostInfo, StatusResponse};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::AppContext;
use super::helpers::indent_lines;

#[derive(Serialize)]
struct StatusReport {
    endpoint: String,
    #[serde(flatten)]
    status: StatusResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<HostInfo>,
}

fn counts(map: &BTreeMap<String, u64>) -> String {
    if map.is_empty() {
        return "none".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn status(app: &AppContext) -> Result<()> {
    let client = app.api()?;
    let status: StatusResponse = client.get(&app.ctx, "/v1/status").await?;
    let host = match client.get::<HostInfo>(&app.ctx, "/v1/host").await {
        Ok(host) => Some(host),
        Err(e) => {
            debug!("host info unavailable: {}", e);
            None
        }
    };

    let report = StatusReport {
        endpoint: client.target(),
        status,
        host,
    };
    app.out.render(&report, || {
        println!("endpoint:  {}", report.endpoint);
        if let Some(version) = &report.status.version {
            println!("version:   {version}");
        }
        if let Some(uptime) = report.status.uptime_seconds {
            println!(
                "uptime:    {}",
                humantime::format_duration(std::time::Duration::from_secs(uptime))
            );
        }
        println!("sandboxes: {}", counts(&report.status.sandboxes));
        println!("jobs:      {}", counts(&report.status.jobs));
        if let Some(modes) = &report.status.network_modes {
            println!("network:   {}", counts(modes));
        }
        if let Some(host) = &report.host {
            let mut lines = Vec::new();
            if let Some(name) = &host.hostname {
                lines.push(format!("hostname: {name}"));
            }
            if let Some(dns) = &host.tailscale_dns {
                lines.push(format!("tailscale: {dns}"));
            }
            if let Some(subnet) = &host.agent_subnet {
                lines.push(format!("agent subnet: {subnet}"));
            }
            if !lines.is_empty() {
                println!("host:");
                println!("{}", indent_lines(&lines.join("\n"), "  "));
            }
        }
    })
}
