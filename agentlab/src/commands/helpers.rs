//! Shared helper functions for agentlab commands.

use agentlab_common::CliError;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use super::AppContext;
use crate::artifacts::{doctor_file_name, resolve_artifact_out_path, stream_to_file};
use crate::transport::{ApiError, Response, api_path};

/// `/v1/sandboxes/{vmid}[/action…]`.
pub fn sandbox_path(vmid: u32, action: &[&str]) -> Result<String, ApiError> {
    let vmid = vmid.to_string();
    let mut segments = vec![vmid.as_str()];
    segments.extend_from_slice(action);
    api_path("/v1/sandboxes", &segments)
}

/// Port from `:8080` or `8080`.
pub fn parse_port(raw: &str) -> Result<u16, CliError> {
    let digits = raw.trim().strip_prefix(':').unwrap_or(raw.trim());
    match digits.parse::<u16>() {
        Ok(0) | Err(_) => Err(CliError::usage(format!(
            "invalid port {raw:?}: expected :PORT with PORT in 1-65535"
        ))),
        Ok(port) => Ok(port),
    }
}

/// `Some(true)` for a set flag, `None` otherwise, so unset stays off the wire.
pub fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

/// Indent each line of text with a given prefix.
pub fn indent_lines(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `key: value` lines for a flat JSON object; nested values are compact JSON.
pub fn format_fields(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                Value::Null => format!("{k}: -"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Serialize)]
struct Download<'a> {
    path: String,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// Save a doctor bundle under `out` (file, directory, or cwd).
pub async fn save_doctor_bundle(
    app: &AppContext,
    response: Response,
    kind: &str,
    id: &str,
    out: Option<&str>,
) -> Result<()> {
    let dest = resolve_artifact_out_path(out.unwrap_or(""), &doctor_file_name(kind, id))?;
    let bytes = stream_to_file(&app.ctx, response, &dest).await?;
    let report = Download {
        path: dest.display().to_string(),
        bytes,
        kind: Some(kind),
        id: Some(id),
    };
    app.out.render(&report, || {
        println!("wrote {} doctor bundle to {} ({} bytes)", kind, report.path, bytes)
    })
}

/// Report a finished file download.
pub fn report_download(app: &AppContext, path: &std::path::Path, bytes: u64) -> Result<()> {
    let report = Download {
        path: path.display().to_string(),
        bytes,
        kind: None,
        id: None,
    };
    app.out
        .render(&report, || println!("wrote {} ({} bytes)", report.path, bytes))
}
