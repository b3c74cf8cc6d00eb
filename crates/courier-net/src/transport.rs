//! The request/response seam between the client and the server.
//!
//! Everything above this layer (entity loads, saves, query pages) goes
//! through [`Transport::request`], which completes asynchronously on the
//! client's thread.

use futures::future::LocalBoxFuture;
use serde_json::Value;

use courier_shared::constants::{IS_SYNCING_HEADER, TOTAL_COUNT_HEADER};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// A request relative to the server's base url.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path plus query string, e.g. `/conversations?page_size=50`.
    pub path: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Headers the sync layer cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub total_count: Option<usize>,
    pub is_syncing: bool,
}

impl ResponseHeaders {
    /// Build from raw name/value pairs; names match case-insensitively.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            if name.eq_ignore_ascii_case(TOTAL_COUNT_HEADER) {
                let count = value.trim().parse::<usize>().map_err(|_| {
                    TransportError::InvalidHeader {
                        name: name.to_string(),
                        value: value.to_string(),
                    }
                })?;
                headers.total_count = Some(count);
            } else if name.eq_ignore_ascii_case(IS_SYNCING_HEADER) {
                headers.is_syncing = value.trim().eq_ignore_ascii_case("true");
            }
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub success: bool,
    pub data: Value,
    pub headers: ResponseHeaders,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            status: 200,
            success: true,
            data,
            headers: ResponseHeaders::default(),
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            data: serde_json::json!({ "message": message.into() }),
            headers: ResponseHeaders::default(),
        }
    }

    pub fn with_total_count(mut self, count: usize) -> Self {
        self.headers.total_count = Some(count);
        self
    }

    pub fn syncing(mut self) -> Self {
        self.headers.is_syncing = true;
        self
    }

    /// Server-provided error message, if any.
    pub fn message(&self) -> String {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", self.status))
    }
}

/// Executes requests against the server.
pub trait Transport {
    fn request(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>>;
}
