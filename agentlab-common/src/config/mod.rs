//! Configuration for the agentlab CLI.
//!
//! - `env`: environment variable names and a lookup-injectable parser
//! - `credentials`: the per-user credentials file and flag/env/file precedence
//! - `host`: the read-only daemon host config (`/etc/agentlab/config.yaml`)

pub mod credentials;
pub mod env;
pub mod host;

pub use credentials::{ClientConfig, CredentialFlags, ResolvedCredentials, resolve_credentials};
pub use env::{ConfigSource, EnvError, EnvParser, Sourced};
pub use host::{HostConfig, HostConfigError};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing the credentials file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a config directory; set XDG_CONFIG_HOME or AGENTLAB_CONFIG")]
    NoConfigDir,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed credentials file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode credentials: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Endpoint(#[from] crate::endpoint::EndpointError),
}
