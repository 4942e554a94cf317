//! HTTP(S) to a remote agentlabd origin with a bearer token.

use agentlab_common::normalize_endpoint;
use hyper::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::{ApiError, Response, ResponseBody};

pub(crate) struct HttpTransport {
    base: String,
    token: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new(endpoint: &str, token: &str) -> Result<Self, ApiError> {
        let base = normalize_endpoint(endpoint).map_err(ApiError::InvalidEndpoint)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("agentlab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Connect {
                target: base.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base,
            token: token.to_string(),
            client,
        })
    }

    pub(crate) fn target(&self) -> String {
        self.base.clone()
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        accept: &str,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base, path);
        let mut builder = self.client.request(method, &url).header(ACCEPT, accept);
        if !self.token.is_empty() {
            builder = builder.bearer_auth(&self.token);
        }
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = builder.send().await.map_err(|e| ApiError::Connect {
            target: self.base.clone(),
            reason: e.without_url().to_string(),
        })?;
        Ok(Response {
            status: response.status().as_u16(),
            path: path.to_string(),
            body: ResponseBody::Http(response),
        })
    }
}
