//! Request description and the transport seam.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use super::HttpResponse;
use crate::error::Error;

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `application/json`
    Json(Value),
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// Everything about a request except its method and URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Body,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn form<K: ToString, V: ToString>(mut self, fields: &[(K, V)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn raw(mut self, content_type: &str, bytes: Vec<u8>) -> Self {
        self.body = Body::Raw {
            content_type: content_type.to_string(),
            bytes,
        };
        self
    }

    /// Header names compare case-insensitively.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Replace any header called `name` with a single value.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

/// Sends a single HTTP request.
///
/// Implementations perform exactly one exchange per call; retrying is the
/// caller's concern. Relative URLs are resolved against the transport's base
/// URI.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, Error>;
}
