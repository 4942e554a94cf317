//! CLI error taxonomy.
//!
//! Every failure the CLI reports carries a kind (which picks the exit code),
//! a message, an optional next step, and zero or more hints. Hints are
//! rendered as `Hint:` lines in text mode and as a `hints` array in JSON
//! mode.
//!
//! | Kind                | Exit | Typical source                                  |
//! |---------------------|------|-------------------------------------------------|
//! | Usage               | 2    | bad flags, missing args, mutually exclusive     |
//! | Transport           | 1    | connection refused, TLS failure                 |
//! | Protocol            | 1    | daemon returned status >= 400                   |
//! | NotFound            | 1    | 404-shaped errors, enriched with suggestions    |
//! | Timeout / Canceled  | 1    | deadline exceeded vs. interrupted               |
//! | ConfirmationRefused | 1    | destructive op without `--force`                |
//! | Subprocess          | 1    | ssh/ip/nft/tailscale failures                   |
//! | Config / Operation  | 1    | everything else                                 |

mod redact;

pub use redact::{REDACTED, sanitize};

use serde::Serialize;
use std::fmt;

/// Broad category of a CLI failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Usage,
    Transport,
    Protocol,
    NotFound,
    Timeout,
    Canceled,
    ConfirmationRefused,
    Subprocess,
    Config,
    Operation,
}

impl ErrorKind {
    /// Process exit code for this kind of failure.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Usage => 2,
            _ => 1,
        }
    }
}

/// A user-facing error with a suggested next step and hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    pub kind: ErrorKind,
    pub message: String,
    pub next: Option<String>,
    pub hints: Vec<String>,
}

impl CliError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            next: None,
            hints: Vec::new(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.extend(hints.into_iter().map(Into::into));
        self
    }

    /// Replace every secret in message, next step and hints.
    pub fn redacted(mut self, secrets: &[&str]) -> Self {
        self.message = sanitize(&self.message, secrets);
        self.next = self.next.map(|n| sanitize(&n, secrets));
        self.hints = self.hints.iter().map(|h| sanitize(h, secrets)).collect();
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// JSON body written to stdout in `--json` mode.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(next) = &self.next {
            body["next"] = serde_json::Value::String(next.clone());
        }
        if !self.hints.is_empty() {
            body["hints"] = serde_json::json!(self.hints);
        }
        body
    }

    /// Text lines written to stderr in human mode.
    pub fn to_text(&self) -> String {
        let mut out = format!("Error: {}", self.message);
        if let Some(next) = &self.next {
            out.push_str(&format!("\nNext: {next}"));
        }
        for hint in &self.hints {
            out.push_str(&format!("\nHint: {hint}"));
        }
        out
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::usage("bad flag").exit_code(), 2);
        assert_eq!(CliError::not_found("gone").exit_code(), 1);
        assert_eq!(
            CliError::new(ErrorKind::ConfirmationRefused, "no").exit_code(),
            1
        );
    }

    #[test]
    fn test_text_rendering() {
        let err = CliError::not_found("sandbox 9010 not found")
            .with_next("run agentlab sandbox list")
            .with_hint("closest VMIDs: 9001, 9011");
        assert_eq!(
            err.to_text(),
            "Error: sandbox 9010 not found\nNext: run agentlab sandbox list\nHint: closest VMIDs: 9001, 9011"
        );
    }

    #[test]
    fn test_json_rendering_omits_empty_fields() {
        let err = CliError::operation("boom");
        assert_eq!(err.to_json(), serde_json::json!({"error": "boom"}));

        let err = err.with_hint("h1");
        assert_eq!(err.to_json()["hints"], serde_json::json!(["h1"]));
    }

    #[test]
    fn test_redacted_covers_all_fields() {
        let err = CliError::operation("token s3cr3t rejected")
            .with_next("rotate s3cr3t")
            .with_hint("s3cr3t is stale")
            .redacted(&["s3cr3t"]);
        assert!(!err.to_text().contains("s3cr3t"));
        assert!(err.message.contains(REDACTED));
    }
}
