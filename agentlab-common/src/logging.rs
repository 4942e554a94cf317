//! Tracing subscriber setup.
//!
//! Diagnostics always go to stderr; stdout carries command output only.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::env::{ENV_LOG, ENV_LOG_FORMAT, EnvParser};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when neither `AGENTLAB_LOG` nor `RUST_LOG` is set.
    pub default_directive: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Build from the environment; `verbose` raises the default to debug.
    pub fn from_env(env: &EnvParser<'_>, verbose: bool) -> Self {
        let format = match env.get_string(ENV_LOG_FORMAT) {
            Some(s) if s.value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            default_directive: if verbose { "debug" } else { "warn" }.to_string(),
            format,
        }
    }

    /// Filter directive: `AGENTLAB_LOG`, then `RUST_LOG`, then the default.
    pub fn directive(&self, env: &EnvParser<'_>) -> String {
        env.get_string(ENV_LOG)
            .or_else(|| env.get_string("RUST_LOG"))
            .map(|s| s.value)
            .unwrap_or_else(|| self.default_directive.clone())
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging(config: &LogConfig, env: &EnvParser<'_>) {
    let directive = config.directive(env);
    let filter = EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));
    let writer = BoxMakeWriter::new(std::io::stderr);

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(false)
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> EnvParser<'static> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvParser::with_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_directive_precedence() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.directive(&env_of(&[])), "warn");
        assert_eq!(cfg.directive(&env_of(&[("RUST_LOG", "info")])), "info");
        assert_eq!(
            cfg.directive(&env_of(&[("RUST_LOG", "info"), (ENV_LOG, "agentlab=trace")])),
            "agentlab=trace"
        );
    }

    #[test]
    fn test_verbose_and_json_format() {
        let cfg = LogConfig::from_env(&env_of(&[(ENV_LOG_FORMAT, "JSON")]), true);
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.default_directive, "debug");
    }
}
