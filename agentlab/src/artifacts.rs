//! Artifact selection and streaming downloads.

use agentlab_common::protocol::ARTIFACT_BUNDLE_NAME;
use agentlab_common::{Artifact, CliError, slugify_workspace_name};
use anyhow::{Context, Result};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::context::{Interrupted, RequestContext};
use crate::transport::{ApiError, Response};

const DEFAULT_ARTIFACT_NAME: &str = "artifact";

/// Which artifact of a job to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Path(String),
    Name(String),
    Bundle,
    Latest,
}

impl Selector {
    /// Build a selector from the download flags; none given means bundle.
    pub fn from_flags(
        path: Option<String>,
        name: Option<String>,
        bundle: bool,
        latest: bool,
    ) -> Result<Self, CliError> {
        let chosen = [path.is_some(), name.is_some(), bundle, latest]
            .iter()
            .filter(|&&set| set)
            .count();
        if chosen > 1 {
            return Err(CliError::usage(
                "--path, --name, --bundle and --latest are mutually exclusive",
            ));
        }
        if let Some(path) = path {
            return Ok(Self::Path(path));
        }
        if let Some(name) = name {
            if name.contains('/') || name.contains('\\') {
                return Err(CliError::usage(format!(
                    "--name {name:?} must not contain path separators; use --path instead"
                )));
            }
            return Ok(Self::Name(name));
        }
        if latest {
            return Ok(Self::Latest);
        }
        Ok(Self::Bundle)
    }

    /// Pick from a job's artifacts, which the daemon lists oldest first.
    pub fn select<'a>(&self, artifacts: &'a [Artifact]) -> Result<&'a Artifact, CliError> {
        if artifacts.is_empty() {
            return Err(CliError::not_found("job has no artifacts"));
        }
        let found = match self {
            Self::Path(path) => artifacts.iter().find(|a| &a.path == path),
            Self::Name(name) => artifacts.iter().find(|a| &a.name == name),
            Self::Bundle => artifacts
                .iter()
                .find(|a| a.name == ARTIFACT_BUNDLE_NAME)
                .or_else(|| artifacts.last()),
            Self::Latest => artifacts.last(),
        };
        found.ok_or_else(|| {
            let what = match self {
                Self::Path(p) => format!("path {p:?}"),
                Self::Name(n) => format!("name {n:?}"),
                _ => "selection".to_string(),
            };
            CliError::not_found(format!("no artifact with {what}"))
                .with_next("run `agentlab job artifacts list <job>` to see artifact names")
        })
    }
}

/// Where a download lands.
///
/// An empty `out` uses `name` in the current directory; a trailing
/// separator or an existing directory joins `name`; anything else is the
/// literal file path, with parents created.
pub fn resolve_artifact_out_path(out: &str, name: &str) -> Result<PathBuf> {
    let name = if name.trim().is_empty() {
        DEFAULT_ARTIFACT_NAME
    } else {
        name
    };
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_ARTIFACT_NAME.into());

    if out.is_empty() {
        return Ok(PathBuf::from(file_name));
    }
    if out.ends_with(MAIN_SEPARATOR) || out.ends_with('/') {
        std::fs::create_dir_all(out).with_context(|| format!("create directory {out}"))?;
        return Ok(Path::new(out).join(file_name));
    }
    let out_path = Path::new(out);
    if out_path.is_dir() {
        return Ok(out_path.join(file_name));
    }
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(out_path.to_path_buf())
}

/// `agentlab-doctor-<kind>-<slug>.tar.gz`.
pub fn doctor_file_name(kind: &str, id: &str) -> String {
    let slug = slugify_workspace_name(id);
    let slug = if slug.is_empty() { "bundle".to_string() } else { slug };
    format!("agentlab-doctor-{kind}-{slug}.tar.gz")
}

/// A download in progress: a temp file next to its destination that only
/// appears at `dest` once committed. Dropping it removes the temp file.
pub struct PartialFile {
    file: tokio::fs::File,
    temp: TempPath,
    dest: PathBuf,
}

impl PartialFile {
    pub fn create(dest: &Path) -> Result<Self> {
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".agentlab-download-")
            .tempfile_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        let (file, temp) = tmp.into_parts();
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            temp,
            dest: dest.to_path_buf(),
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .with_context(|| format!("write {}", self.dest.display()))
    }

    /// Fsync, set mode 0644 and rename over `dest`.
    pub async fn commit(mut self) -> Result<()> {
        self.file.flush().await.context("flush download")?;
        self.file
            .sync_all()
            .await
            .with_context(|| format!("sync {}", self.dest.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.temp, std::fs::Permissions::from_mode(0o644))
                .await
                .with_context(|| format!("chmod {}", self.temp.display()))?;
        }
        drop(self.file);
        self.temp
            .persist(&self.dest)
            .map_err(|e| e.error)
            .with_context(|| format!("rename into {}", self.dest.display()))
    }
}

/// Stream a response body to `dest`, replacing it only once the whole body
/// has arrived. Returns the number of bytes written.
pub async fn stream_to_file(
    ctx: &RequestContext,
    mut response: Response,
    dest: &Path,
) -> Result<u64> {
    let mut partial = PartialFile::create(dest)?;
    let mut written: u64 = 0;
    loop {
        let chunk = match ctx.run(response.chunk()).await {
            Ok(chunk) => chunk?,
            Err(Interrupted::Canceled) => {
                anyhow::bail!(ApiError::Canceled {
                    method: "GET".into(),
                    path: dest.display().to_string(),
                })
            }
            Err(Interrupted::DeadlineExceeded) => {
                anyhow::bail!(ApiError::Timeout {
                    method: "GET".into(),
                    path: dest.display().to_string(),
                })
            }
        };
        let Some(chunk) = chunk else { break };
        partial.write(&chunk).await?;
        written += chunk.len() as u64;
    }
    partial.commit().await?;
    debug!("wrote {} bytes to {}", written, dest.display());
    Ok(written)
}
