//! HTTP/1.1 over the daemon's Unix socket.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use tokio::net::UnixStream;
use tracing::debug;

use super::{ApiError, Response, ResponseBody};

pub(crate) struct UnixTransport {
    socket: PathBuf,
}

impl UnixTransport {
    pub(crate) fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub(crate) fn target(&self) -> String {
        format!("unix socket {}", self.socket.display())
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        accept: &str,
    ) -> Result<Response, ApiError> {
        let connect_err = |reason: String| ApiError::Connect {
            target: self.target(),
            reason,
        };

        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| connect_err(format!("http1 handshake: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("unix connection closed: {}", e);
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("http://unix{path}"))
            .header(HOST, "unix")
            .header(ACCEPT, accept);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ApiError::Encode(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| connect_err(format!("send request: {e}")))?;
        Ok(Response {
            status: response.status().as_u16(),
            path: path.to_string(),
            body: ResponseBody::Unix(response.into_body()),
        })
    }
}

/// Next data frame of a hyper body, skipping trailers.
pub(crate) async fn next_chunk(body: &mut Incoming) -> Result<Option<Bytes>, hyper::Error> {
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            return Ok(Some(data));
        }
    }
    Ok(None)
}
