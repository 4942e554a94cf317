//! HTTP transport to `agentlabd`.
//!
//! Two backends share one request surface: the local Unix socket (hyper
//! over `UnixStream`, no auth) and a remote origin (reqwest, bearer token).
//! Every returned error has the client's token scrubbed out.

mod http;
mod unix;

use agentlab_common::protocol::ErrorBody;
use agentlab_common::{EndpointError, ResolvedCredentials, sanitize};
use bytes::Bytes;
use hyper::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::context::{Interrupted, RequestContext};

/// Cap on buffered response bodies.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Per-request timeout when `--timeout` is not given.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    /// The daemon answered with status >= 400.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("cannot reach agentlabd at {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("request {method} {path} timed out")]
    Timeout { method: String, path: String },

    #[error("request {method} {path} canceled")]
    Canceled { method: String, path: String },

    #[error("response from {path} exceeds {limit} bytes")]
    ResponseTooLarge { path: String, limit: usize },

    #[error("failed to decode response from {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("I/O error reading response from {path}: {reason}")]
    Io { path: String, reason: String },

    #[error(transparent)]
    InvalidEndpoint(EndpointError),

    #[error(transparent)]
    InvalidPath(EndpointError),
}

impl ApiError {
    /// 404, or a daemon message that says something was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Status { status, message } => {
                *status == 404 || message.to_lowercase().contains("not found")
            }
            _ => false,
        }
    }

    fn interrupted(reason: Interrupted, method: &Method, path: &str) -> Self {
        let (method, path) = (method.to_string(), path.to_string());
        match reason {
            Interrupted::Canceled => Self::Canceled { method, path },
            Interrupted::DeadlineExceeded => Self::Timeout { method, path },
        }
    }

    fn redact(self, secrets: &[&str]) -> Self {
        let s = |text: String| sanitize(&text, secrets);
        match self {
            Self::Status { status, message } => Self::Status {
                status,
                message: s(message),
            },
            Self::Connect { target, reason } => Self::Connect {
                target: s(target),
                reason: s(reason),
            },
            Self::Decode { path, reason } => Self::Decode {
                path,
                reason: s(reason),
            },
            Self::Io { path, reason } => Self::Io {
                path,
                reason: s(reason),
            },
            Self::Encode(reason) => Self::Encode(s(reason)),
            other => other,
        }
    }
}

/// Map a non-success status and body to an error.
///
/// The message is the decoded `error` (or `message`) field when the body
/// carries one, else `request failed with status N`.
pub fn parse_api_error(status: u16, body: &[u8]) -> ApiError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| format!("request failed with status {status}"));
    ApiError::Status { status, message }
}

// =============================================================================
// Responses
// =============================================================================

pub(crate) enum ResponseBody {
    Unix(hyper::body::Incoming),
    Http(reqwest::Response),
}

/// An open response whose body has not been read yet.
pub struct Response {
    pub status: u16,
    path: String,
    body: ResponseBody,
}

impl Response {
    /// Next body chunk, `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ApiError> {
        let io_err = |reason: String| ApiError::Io {
            path: self.path.clone(),
            reason,
        };
        match &mut self.body {
            ResponseBody::Unix(incoming) => unix::next_chunk(incoming)
                .await
                .map_err(|e| io_err(e.to_string())),
            ResponseBody::Http(resp) => resp.chunk().await.map_err(|e| io_err(e.to_string())),
        }
    }

    /// Buffer the whole body, failing once it grows past `limit`.
    pub async fn read_limited(&mut self, limit: usize) -> Result<Vec<u8>, ApiError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            if buf.len() + chunk.len() > limit {
                return Err(ApiError::ResponseTooLarge {
                    path: self.path.clone(),
                    limit,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

// =============================================================================
// Client
// =============================================================================

enum Backend {
    Unix(unix::UnixTransport),
    Http(http::HttpTransport),
}

pub struct Client {
    backend: Backend,
    token: String,
    timeout: Duration,
}

impl Client {
    /// Build a client from resolved credentials. The endpoint is assumed to
    /// be normalized already; an empty endpoint selects the Unix socket.
    pub fn new(creds: &ResolvedCredentials, timeout: Duration) -> Result<Self, ApiError> {
        let token = creds.token_str().to_string();
        let backend = if creds.uses_socket() {
            Backend::Unix(unix::UnixTransport::new(creds.socket_path.clone()))
        } else {
            Backend::Http(http::HttpTransport::new(&creds.endpoint.value, &token)?)
        };
        Ok(Self {
            backend,
            token,
            timeout,
        })
    }

    /// Human-readable target for log lines and hints.
    pub fn target(&self) -> String {
        match &self.backend {
            Backend::Unix(u) => u.target(),
            Backend::Http(h) => h.target(),
        }
    }

    fn secrets(&self) -> Vec<&str> {
        vec![self.token.as_str()]
    }

    /// Send a request and return the open response, mapping status >= 400
    /// to an error.
    pub async fn request(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        accept: &str,
    ) -> Result<Response, ApiError> {
        debug!("{} {} via {}", method, path, self.target());
        let ctx = ctx.with_timeout(self.timeout);
        let send = async {
            match &self.backend {
                Backend::Unix(u) => u.send(method.clone(), path, body, accept).await,
                Backend::Http(h) => h.send(method.clone(), path, body, accept).await,
            }
        };
        let result = match ctx.run(send).await {
            Ok(r) => r,
            Err(reason) => Err(ApiError::interrupted(reason, &method, path)),
        };
        let mut response = result.map_err(|e| e.redact(&self.secrets()))?;

        if response.status >= 400 {
            let body = match ctx.run(response.read_limited(MAX_RESPONSE_BYTES)).await {
                Ok(Ok(body)) => body,
                _ => Vec::new(),
            };
            return Err(parse_api_error(response.status, &body).redact(&self.secrets()));
        }
        Ok(response)
    }

    /// JSON round trip returning the raw response bytes.
    pub async fn do_json<B: Serialize + ?Sized>(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        payload: Option<&B>,
    ) -> Result<Vec<u8>, ApiError> {
        let body = payload
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ApiError::Encode(e.to_string()))?;
        let ctx = ctx.with_timeout(self.timeout);
        let mut response = self
            .request(&ctx, method.clone(), path, body, "application/json")
            .await?;
        match ctx.run(response.read_limited(MAX_RESPONSE_BYTES)).await {
            Ok(read) => read.map_err(|e| e.redact(&self.secrets())),
            Err(reason) => Err(ApiError::interrupted(reason, &method, path)),
        }
    }

    fn decode<T: DeserializeOwned>(path: &str, raw: &[u8]) -> Result<T, ApiError> {
        serde_json::from_slice(raw).map_err(|e| ApiError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<T, ApiError> {
        let raw = self.do_json::<()>(ctx, Method::GET, path, None).await?;
        Self::decode(path, &raw)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let raw = self.do_json(ctx, Method::POST, path, Some(body)).await?;
        Self::decode(path, &raw)
    }

    /// POST with no body.
    pub async fn post_empty<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<T, ApiError> {
        let raw = self.do_json::<()>(ctx, Method::POST, path, None).await?;
        Self::decode(path, &raw)
    }

    pub async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<Vec<u8>, ApiError> {
        self.do_json::<()>(ctx, Method::DELETE, path, None).await
    }

    /// Open a streaming response. Only the time to first byte is bounded by
    /// the request timeout; the caller owns the body.
    pub async fn open_stream(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
    ) -> Result<Response, ApiError> {
        self.request(ctx, method, path, None, "application/octet-stream")
            .await
    }
}

/// Build a path with escaped segments, mapped to a transport error.
pub fn api_path(base: &str, segments: &[&str]) -> Result<String, ApiError> {
    agentlab_common::endpoint_path(base, segments).map_err(ApiError::InvalidPath)
}
