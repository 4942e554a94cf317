//! Environment variable lookup with source tracking.
//!
//! Every read goes through an injected lookup function so precedence rules
//! can be tested without mutating the process environment.

use std::time::Duration;
use thiserror::Error;

pub const ENV_ENDPOINT: &str = "AGENTLAB_ENDPOINT";
pub const ENV_TOKEN: &str = "AGENTLAB_TOKEN";
pub const ENV_SOCKET: &str = "AGENTLAB_SOCKET";
pub const ENV_SSH_IDENTITY: &str = "AGENTLAB_SSH_IDENTITY";
pub const ENV_JUMP_HOST: &str = "AGENTLAB_JUMP_HOST";
pub const ENV_JUMP_USER: &str = "AGENTLAB_JUMP_USER";
pub const ENV_CONFIG: &str = "AGENTLAB_CONFIG";
pub const ENV_LOG: &str = "AGENTLAB_LOG";
pub const ENV_LOG_FORMAT: &str = "AGENTLAB_LOG_FORMAT";
pub const ENV_XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";

/// Errors that can occur while parsing environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },
}

/// Where a resolved setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag,
    Env(&'static str),
    File,
    Derived,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag => write!(f, "flag"),
            Self::Env(var) => write!(f, "env:{var}"),
            Self::File => write!(f, "config file"),
            Self::Derived => write!(f, "derived"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// A value paired with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

type Lookup<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

/// Type-safe environment reader.
///
/// Collects errors so every malformed variable is reported at once.
pub struct EnvParser<'a> {
    lookup: Lookup<'a>,
    errors: Vec<EnvError>,
}

impl EnvParser<'static> {
    /// Parser over the real process environment.
    pub fn from_process() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }
}

impl<'a> EnvParser<'a> {
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Trimmed, non-empty value of `var`.
    pub fn get_string(&self, var: &'static str) -> Option<Sourced<String>> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| Sourced::new(v, ConfigSource::Env(var)))
    }

    /// Boolean value; accepts 1/true/yes/on and 0/false/no/off.
    pub fn get_bool(&mut self, var: &'static str) -> Option<bool> {
        let raw = self.get_string(var)?.value;
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.to_string(),
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value: raw,
                });
                None
            }
        }
    }

    /// Duration in humantime syntax (`150ms`, `10s`, `2m`).
    pub fn get_duration(&mut self, var: &'static str) -> Option<Duration> {
        let raw = self.get_string(var)?.value;
        match humantime::parse_duration(&raw) {
            Ok(d) => Some(d),
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var.to_string(),
                    value: raw,
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parser(pairs: &[(&str, &str)]) -> EnvParser<'static> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvParser::with_lookup(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_get_string_trims_and_drops_empty() {
        let env = parser(&[(ENV_ENDPOINT, "  http://pve:8845 "), (ENV_TOKEN, "   ")]);
        let endpoint = env.get_string(ENV_ENDPOINT).unwrap();
        assert_eq!(endpoint.value, "http://pve:8845");
        assert_eq!(endpoint.source, ConfigSource::Env(ENV_ENDPOINT));
        assert!(env.get_string(ENV_TOKEN).is_none());
    }

    #[test]
    fn test_get_bool_collects_errors() {
        let mut env = parser(&[("A", "yes"), ("B", "maybe")]);
        assert_eq!(env.get_bool("A"), Some(true));
        assert_eq!(env.get_bool("B"), None);
        assert_eq!(env.errors().len(), 1);
    }

    #[test]
    fn test_get_duration() {
        let mut env = parser(&[("T", "150ms"), ("BAD", "soon")]);
        assert_eq!(env.get_duration("T"), Some(Duration::from_millis(150)));
        assert_eq!(env.get_duration("BAD"), None);
        assert!(matches!(
            env.take_errors().as_slice(),
            [EnvError::InvalidDuration { .. }]
        ));
    }
}
