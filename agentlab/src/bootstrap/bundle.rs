//! Bootstrap asset bundle: scripts, the skill bundle and optionally the
//! binaries, packed as a deterministic tar.gz.

use agentlab_common::CliError;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Files whose presence marks an assets root.
pub const REQUIRED_ASSETS: &[&str] = &[
    "scripts/install_host.sh",
    "scripts/net/setup_vmbr1.sh",
    "scripts/net/apply.sh",
    "skills/agentlab",
];

pub fn is_assets_root(dir: &Path) -> bool {
    REQUIRED_ASSETS.iter().all(|rel| dir.join(rel).exists())
}

/// Walk upward from `start` to the first directory holding every asset.
pub fn find_assets_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| is_assets_root(dir))
        .map(Path::to_path_buf)
}

/// Explicit `--assets` wins; otherwise search from the working directory
/// and then from the executable's directory.
pub fn locate_assets(explicit: Option<&Path>) -> Result<PathBuf, CliError> {
    if let Some(dir) = explicit {
        if is_assets_root(dir) {
            return Ok(dir.to_path_buf());
        }
        return Err(CliError::usage(format!(
            "{} is not an agentlab assets directory (needs {})",
            dir.display(),
            REQUIRED_ASSETS.join(", ")
        )));
    }
    let from_cwd = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_assets_root(&cwd));
    let from_exe = || {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(find_assets_root))
    };
    from_cwd.or_else(from_exe).ok_or_else(|| {
        CliError::usage("could not find the agentlab assets directory")
            .with_hint("run from a checkout of the agentlab repository or pass --assets <dir>")
    })
}

/// Where the remote host gets its binaries from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySource {
    Upload { agentlab: PathBuf, agentlabd: PathBuf },
    Download { agentlab: String, agentlabd: String },
}

impl BinarySource {
    /// Both `--*-bin` paths, both `--*-url` URLs, or `<assets>/dist`.
    pub fn resolve(
        agentlab_bin: Option<PathBuf>,
        agentlabd_bin: Option<PathBuf>,
        agentlab_url: Option<String>,
        agentlabd_url: Option<String>,
        assets: &Path,
    ) -> Result<Self, CliError> {
        let any_bin = agentlab_bin.is_some() || agentlabd_bin.is_some();
        let any_url = agentlab_url.is_some() || agentlabd_url.is_some();
        if any_bin && any_url {
            return Err(CliError::usage(
                "use either --agentlab-bin/--agentlabd-bin or --agentlab-url/--agentlabd-url, not both",
            ));
        }
        match (agentlab_bin, agentlabd_bin, agentlab_url, agentlabd_url) {
            (Some(cli), Some(daemon), None, None) => Ok(Self::Upload {
                agentlab: cli,
                agentlabd: daemon,
            }),
            (None, None, Some(cli), Some(daemon)) => Ok(Self::Download {
                agentlab: cli,
                agentlabd: daemon,
            }),
            (None, None, None, None) => {
                let cli = assets.join("dist/agentlab");
                let daemon = assets.join("dist/agentlabd");
                if cli.is_file() && daemon.is_file() {
                    Ok(Self::Upload {
                        agentlab: cli,
                        agentlabd: daemon,
                    })
                } else {
                    Err(CliError::usage("no agentlab binaries to install").with_hint(
                        "build Linux binaries into dist/ or pass --agentlab-bin/--agentlabd-bin or --agentlab-url/--agentlabd-url",
                    ))
                }
            }
            _ if any_bin => Err(CliError::usage(
                "--agentlab-bin and --agentlabd-bin must be given together",
            )),
            _ => Err(CliError::usage(
                "--agentlab-url and --agentlabd-url must be given together",
            )),
        }
    }
}

fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    rel: &str,
) -> Result<usize> {
    let mut count = 0;
    let walker = WalkDir::new(root.join(rel))
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {rel}"))?;
        let path = entry.path();
        let name = path
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
        if entry.file_type().is_dir() {
            builder
                .append_dir(name, path)
                .with_context(|| format!("add {}", name.display()))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(path, name)
                .with_context(|| format!("add {}", name.display()))?;
            count += 1;
        }
    }
    Ok(count)
}

fn append_binary<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    local: &Path,
    name: &str,
) -> Result<()> {
    let mut file = File::open(local).with_context(|| format!("open {}", local.display()))?;
    let len = file.metadata()?.len();
    let mut header = tar::Header::new_gnu();
    header.set_size(len);
    header.set_mode(0o755);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("dist/{name}"), &mut file)
        .with_context(|| format!("add dist/{name}"))?;
    Ok(())
}

/// Write the bundle to `out` and return the number of files packed.
pub fn write_bundle(out: File, assets: &Path, binaries: &BinarySource) -> Result<usize> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    let mut files = append_tree(&mut builder, assets, "scripts")?;
    files += append_tree(&mut builder, assets, "skills/agentlab")?;
    if let BinarySource::Upload {
        agentlab,
        agentlabd,
    } = binaries
    {
        append_binary(&mut builder, agentlab, "agentlab")?;
        append_binary(&mut builder, agentlabd, "agentlabd")?;
        files += 2;
    }

    let encoder = builder.into_inner().context("finish tar stream")?;
    let file = encoder.finish().context("finish gzip stream")?;
    file.sync_all().context("sync bundle")?;
    debug!("bundled {} files from {}", files, assets.display());
    Ok(files)
}

/// Build the bundle in a temporary file that is removed on drop.
pub fn build_bundle(assets: &Path, binaries: &BinarySource) -> Result<(tempfile::NamedTempFile, usize)> {
    let tmp = tempfile::Builder::new()
        .prefix("agentlab-bootstrap-")
        .suffix(".tar.gz")
        .tempfile()
        .context("create bundle file")?;
    let handle = tmp.reopen().context("open bundle file")?;
    let files = write_bundle(handle, assets, binaries)?;
    Ok((tmp, files))
}
