//! Shared types and utilities for the agentlab CLI.
//!
//! This crate holds everything that does not need a network stack or a
//! terminal: the daemon data model and wire payloads, endpoint and URL path
//! normalization, the per-user credentials store, the host config reader,
//! the CLI error taxonomy with secret redaction, and the suggestion ranker
//! used for "did you mean" hints.

pub mod config;
pub mod endpoint;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod suggest;
pub mod types;
pub mod util;

pub use config::{
    ClientConfig, ConfigError, ConfigSource, CredentialFlags, EnvParser, HostConfig,
    ResolvedCredentials, Sourced, resolve_credentials,
};
pub use endpoint::{EndpointError, endpoint_path, normalize_endpoint};
pub use errors::{CliError, ErrorKind, sanitize};
pub use logging::{LogConfig, LogFormat, init_logging};
pub use suggest::{closest_vmids, did_you_mean, rank_suggestions};
pub use types::*;
pub use util::{mask_sensitive_command, slugify_workspace_name, truncate_output};
