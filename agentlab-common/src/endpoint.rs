//! Endpoint normalization and safe URL path construction.
//!
//! Normalization happens once, at the transport boundary. Everything
//! downstream treats the normalized origin as opaque.

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid endpoint {raw:?}: {reason}")]
    InvalidEndpoint { raw: String, reason: String },

    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidSegment { segment: String, reason: &'static str },
}

fn invalid(raw: &str, reason: impl Into<String>) -> EndpointError {
    EndpointError::InvalidEndpoint {
        raw: raw.to_string(),
        reason: reason.into(),
    }
}

/// Normalize a daemon endpoint to a bare origin (`scheme://host[:port]`).
///
/// Empty input means "use the Unix socket" and normalizes to empty. A
/// scheme-less `host[:port]` defaults to `http`. Paths, queries, fragments
/// and credentials are rejected. The result is idempotent under
/// re-normalization and never ends in `/`.
pub fn normalize_endpoint(raw: &str) -> Result<String, EndpointError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(raw, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(raw, format!("unsupported scheme {other:?}"))),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid(raw, "credentials are not allowed in the endpoint"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(invalid(raw, "path is not allowed"));
    }
    if url.query().is_some() {
        return Err(invalid(raw, "query is not allowed"));
    }
    if url.fragment().is_some() {
        return Err(invalid(raw, "fragment is not allowed"));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid(raw, "missing host"))?;

    let mut origin = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    Ok(origin)
}

/// Hostname part of a normalized endpoint, without brackets for IPv6.
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    if endpoint.is_empty() {
        return None;
    }
    let url = Url::parse(endpoint).ok()?;
    match url.host()? {
        url::Host::Domain(d) => Some(d.to_string()),
        url::Host::Ipv4(ip) => Some(ip.to_string()),
        url::Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

fn validate_segment(segment: &str) -> Result<(), EndpointError> {
    let reject = |reason| {
        Err(EndpointError::InvalidSegment {
            segment: segment.to_string(),
            reason,
        })
    };
    if segment.is_empty() {
        return reject("segment is empty");
    }
    if segment == "." || segment == ".." {
        return reject("relative segments are not allowed");
    }
    if segment.contains('/') || segment.contains('\\') {
        return reject("segment contains a path separator");
    }
    if segment.chars().any(char::is_control) {
        return reject("segment contains a control character");
    }
    Ok(())
}

/// Join a trusted base path with caller-supplied segments.
///
/// Each segment is validated and percent-escaped, so user input can never
/// walk out of `base`.
pub fn endpoint_path(base: &str, segments: &[&str]) -> Result<String, EndpointError> {
    let mut path = base.trim_end_matches('/').to_string();
    for segment in segments {
        validate_segment(segment)?;
        path.push('/');
        path.push_str(&urlencoding::encode(segment));
    }
    Ok(path)
}

/// Incrementally built, escaped query string.
#[derive(Debug, Default, Clone)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &str, value: impl ToString) -> Self {
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn push_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.push(key, v),
            None => self,
        }
    }

    /// Append the query to `path`; a no-op when empty.
    pub fn apply(&self, path: &str) -> String {
        if self.pairs.is_empty() {
            return path.to_string();
        }
        let encoded: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", path, encoded.join("&"))
    }
}
