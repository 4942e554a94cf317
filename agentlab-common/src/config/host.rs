//! Read-only view of the daemon's host config (`/etc/agentlab/config.yaml`).
//!
//! The CLI only consumes a handful of keys; unknown keys are ignored.

use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HOST_CONFIG_PATH: &str = "/etc/agentlab/config.yaml";

#[derive(Debug, Error)]
pub enum HostConfigError {
    #[error("failed to read host config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse host config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid agent_subnet {value:?}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("invalid control_listen {value:?}: expected host:port")]
    InvalidListen { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub control_listen: String,
    pub control_auth_token: String,
    pub bootstrap_listen: String,
    pub artifact_listen: String,
    pub agent_subnet: String,
    pub profiles_dir: PathBuf,
    pub snippets_dir: PathBuf,
    pub run_dir: PathBuf,
    pub data_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub socket_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            control_listen: String::new(),
            control_auth_token: String::new(),
            bootstrap_listen: String::new(),
            artifact_listen: String::new(),
            agent_subnet: "10.77.0.0/16".to_string(),
            profiles_dir: PathBuf::from("/etc/agentlab/profiles"),
            snippets_dir: PathBuf::from("/var/lib/vz/snippets"),
            run_dir: PathBuf::from("/run/agentlab"),
            data_dir: PathBuf::from("/var/lib/agentlab"),
            artifact_dir: PathBuf::from("/var/lib/agentlab/artifacts"),
            socket_path: PathBuf::from("/run/agentlab/agentlabd.sock"),
        }
    }
}

impl HostConfig {
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, HostConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(raw).map_err(|source| HostConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`; a missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, HostConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml(&raw, path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(HostConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn has_remote_control(&self) -> bool {
        !self.control_listen.trim().is_empty() && !self.control_auth_token.trim().is_empty()
    }

    pub fn agent_network(&self) -> Result<IpNetwork, HostConfigError> {
        self.agent_subnet
            .trim()
            .parse::<IpNetwork>()
            .map_err(|e| HostConfigError::InvalidSubnet {
                value: self.agent_subnet.clone(),
                reason: e.to_string(),
            })
    }

    /// `(host, port)` of `control_listen`; an empty host means all interfaces.
    pub fn control_host_port(&self) -> Result<(String, u16), HostConfigError> {
        let raw = self.control_listen.trim();
        let invalid = || HostConfigError::InvalidListen {
            value: raw.to_string(),
        };
        let (host, port) = raw.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok((host.to_string(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> HostConfig {
        HostConfig::from_yaml(raw, Path::new("/etc/agentlab/config.yaml")).unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let cfg = parse("control_listen: \"0.0.0.0:8845\"\n");
        assert_eq!(cfg.agent_subnet, "10.77.0.0/16");
        assert_eq!(cfg.profiles_dir, PathBuf::from("/etc/agentlab/profiles"));
        assert!(!cfg.has_remote_control());
        assert_eq!(parse(""), HostConfig::default());
    }

    #[test]
    fn test_quoted_values_and_unknown_keys() {
        let cfg = parse(
            "control_listen: \"100.64.0.1:8845\"\ncontrol_auth_token: \"tok\\\"en\\\\x\"\nsome_future_key: 1\n",
        );
        assert_eq!(cfg.control_auth_token, "tok\"en\\x");
        assert!(cfg.has_remote_control());
        assert_eq!(
            cfg.control_host_port().unwrap(),
            ("100.64.0.1".to_string(), 8845)
        );
    }

    #[test]
    fn test_agent_network() {
        let cfg = parse("agent_subnet: 10.77.0.0/16\n");
        let net = cfg.agent_network().unwrap();
        assert!(net.contains("10.77.0.1".parse().unwrap()));
        assert!(!net.contains("10.78.0.1".parse().unwrap()));

        let bad = parse("agent_subnet: nope\n");
        assert!(bad.agent_network().is_err());
    }

    #[test]
    fn test_control_listen_errors() {
        let cfg = parse("control_listen: \"nohost\"\n");
        assert!(cfg.control_host_port().is_err());
        let cfg = parse("control_listen: \":8845\"\n");
        assert_eq!(cfg.control_host_port().unwrap(), (String::new(), 8845));
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let err = HostConfig::from_yaml("control_listen: [unterminated", Path::new("x")).unwrap_err();
        assert!(matches!(err, HostConfigError::Parse { .. }));
    }
}
