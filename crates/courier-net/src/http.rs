//! reqwest-backed [`Transport`].

use std::cell::RefCell;

use futures::future::{FutureExt, LocalBoxFuture};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{Method, Request, Response, ResponseHeaders, Transport};

const ACCEPT_VALUE: &str = "application/vnd.layer+json; version=3.0";
const PATCH_CONTENT_TYPE: &str = "application/vnd.layer-patch+json";

/// HTTP transport talking to a single REST endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    session_token: RefCell<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: RefCell::new(None),
        }
    }

    /// Set (or clear) the session token sent with every request.
    pub fn set_session_token(&self, token: Option<String>) {
        *self.session_token.borrow_mut() = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, request: &Request) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        builder = builder.header(ACCEPT, ACCEPT_VALUE);

        if let Some(token) = self.session_token.borrow().as_ref() {
            builder = builder.header(AUTHORIZATION, format!("Layer session-token=\"{token}\""));
        }

        if let Some(body) = &request.body {
            let content_type = if request.method == Method::Patch {
                PATCH_CONTENT_TYPE
            } else {
                "application/json"
            };
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(body.to_string());
        }
        builder
    }
}

impl Transport for HttpTransport {
    fn request(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>> {
        let builder = self.build(&request);
        let method = request.method;
        let path = request.path;

        async move {
            debug!(method = method.as_str(), path = %path, "sending request");
            let resp = builder.send().await?;
            let status = resp.status();

            let headers = ResponseHeaders::from_pairs(
                resp.headers()
                    .iter()
                    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
            )?;

            let bytes = resp.bytes().await?;
            let data = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)?
            };

            if !status.is_success() {
                warn!(method = method.as_str(), path = %path, status = status.as_u16(), "request failed");
            }

            Ok(Response {
                status: status.as_u16(),
                success: status.is_success(),
                data,
                headers,
            })
        }
        .boxed_local()
    }
}
