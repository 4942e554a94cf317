//! Per-user credentials file and credential precedence.
//!
//! Precedence, highest first: explicit flags, `AGENTLAB_*` environment
//! variables, the credentials file. An empty endpoint means "talk to the
//! local Unix socket".

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ConfigError;
use super::env::{
    ConfigSource, ENV_CONFIG, ENV_ENDPOINT, ENV_JUMP_HOST, ENV_JUMP_USER, ENV_SOCKET, ENV_TOKEN,
    ENV_XDG_CONFIG_HOME, EnvParser, Sourced,
};
use crate::endpoint::{endpoint_host, normalize_endpoint};

/// Daemon socket used when no endpoint is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/run/agentlab/agentlabd.sock";

const CONFIG_DIR_NAME: &str = "agentlab";
const CONFIG_FILE_NAME: &str = "config.json";

/// Contents of `<config_dir>/agentlab/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jump_host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jump_user: String,
}

impl ClientConfig {
    /// Credentials file location: `AGENTLAB_CONFIG`, else
    /// `$XDG_CONFIG_HOME/agentlab/config.json`, else the platform config dir.
    pub fn default_path(env: &EnvParser<'_>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = env.get_string(ENV_CONFIG) {
            return Ok(PathBuf::from(path.value));
        }
        let base = env
            .get_string(ENV_XDG_CONFIG_HOME)
            .map(|s| PathBuf::from(s.value))
            .or_else(dirs::config_dir)
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the file. A missing file yields `None`; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no credentials file at {}", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config = serde_json::from_slice(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    /// Atomically write the file with mode 0600: write `<path>.tmp`, fsync,
    /// rename over the target.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).map_err(write_err)?;
        }

        let mut body = serde_json::to_vec_pretty(self).map_err(ConfigError::Encode)?;
        body.push(b'\n');

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let result = (|| {
            let mut file = open_private(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, path)?;
            set_private(path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(write_err)?;
        debug!("wrote credentials to {}", path.display());
        Ok(())
    }

    /// Remove the file; returns whether anything was removed.
    pub fn remove(path: &Path) -> Result<bool, ConfigError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_private(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

/// Credential-related global flags, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CredentialFlags {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub socket: Option<PathBuf>,
    pub jump_host: Option<String>,
    pub jump_user: Option<String>,
}

/// Effective credentials after applying precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    /// Normalized origin; empty selects the Unix socket.
    pub endpoint: Sourced<String>,
    pub token: Option<Sourced<String>>,
    pub socket_path: PathBuf,
    pub jump_host: Option<Sourced<String>>,
    pub jump_user: Option<Sourced<String>>,
}

impl ResolvedCredentials {
    pub fn uses_socket(&self) -> bool {
        self.endpoint.value.is_empty()
    }

    pub fn token_str(&self) -> &str {
        self.token.as_ref().map(|t| t.value.as_str()).unwrap_or("")
    }

    /// Configured jump host, else the endpoint's hostname unless the
    /// endpoint is the local socket or a loopback address.
    pub fn effective_jump_host(&self) -> Option<Sourced<String>> {
        if let Some(explicit) = &self.jump_host {
            return Some(explicit.clone());
        }
        let host = endpoint_host(&self.endpoint.value)?;
        if is_loopback_host(&host) {
            return None;
        }
        Some(Sourced::new(host, ConfigSource::Derived))
    }
}

fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn pick(
    flag: Option<&String>,
    env: &EnvParser<'_>,
    var: &'static str,
    file: Option<&String>,
) -> Option<Sourced<String>> {
    let non_empty = |v: &String| {
        let t = v.trim();
        (!t.is_empty()).then(|| t.to_string())
    };
    flag.and_then(non_empty)
        .map(|v| Sourced::new(v, ConfigSource::Flag))
        .or_else(|| env.get_string(var))
        .or_else(|| file.and_then(non_empty).map(|v| Sourced::new(v, ConfigSource::File)))
}

/// Apply flag > env > file precedence and normalize the endpoint.
pub fn resolve_credentials(
    flags: &CredentialFlags,
    env: &EnvParser<'_>,
    file: Option<&ClientConfig>,
) -> Result<ResolvedCredentials, ConfigError> {
    let endpoint = pick(
        flags.endpoint.as_ref(),
        env,
        ENV_ENDPOINT,
        file.map(|f| &f.endpoint),
    );
    let endpoint = match endpoint {
        Some(Sourced { value, source }) => Sourced::new(normalize_endpoint(&value)?, source),
        None => Sourced::new(String::new(), ConfigSource::Default),
    };

    // A saved token belongs to the saved endpoint only.
    let file_token = file
        .filter(|f| {
            endpoint.source == ConfigSource::File
                || normalize_endpoint(&f.endpoint).is_ok_and(|saved| saved == endpoint.value)
        })
        .map(|f| &f.token);
    let token = pick(flags.token.as_ref(), env, ENV_TOKEN, file_token);
    let jump_host = pick(
        flags.jump_host.as_ref(),
        env,
        ENV_JUMP_HOST,
        file.map(|f| &f.jump_host),
    );
    let jump_user = pick(
        flags.jump_user.as_ref(),
        env,
        ENV_JUMP_USER,
        file.map(|f| &f.jump_user),
    );

    let socket_path = flags
        .socket
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| env.get_string(ENV_SOCKET).map(|s| PathBuf::from(s.value)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

    Ok(ResolvedCredentials {
        endpoint,
        token,
        socket_path,
        jump_host,
        jump_user,
    })
}
