//! `reqwest`-backed transport with middleware.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::RetryTransientMiddleware;
use tracing::debug;
use url::{form_urlencoded, Url};

use super::{Body, HttpResponse, RequestOptions, RetryPolicy, Transport};
use crate::error::{http_error, Error, HttpErrorKind};

/// Default API base URI.
pub const DEFAULT_BASE_URI: &str = "https://open.tiktokapis.com/";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URI relative request paths are resolved against.
    pub base_uri: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Transport-level retry of transient failures, if any.
    pub retry: Option<RetryPolicy>,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_uri: DEFAULT_BASE_URI.to_string(),
            timeout: Duration::from_secs(30),
            retry: None,
            user_agent: format!("platform-auth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Transport`] over a `reqwest` client with middleware.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ClientWithMiddleware,
    base_uri: Url,
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Resolve `url` against the base URI. Absolute URLs are used unchanged.
    pub fn resolve(&self, url: &str) -> Result<Url, Error> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Url::parse(url).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Http(HttpErrorKind::InvalidUrl),
            });
        }

        self.base_uri
            .join(url.trim_start_matches('/'))
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Http(HttpErrorKind::InvalidUrl),
            })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, Error> {
        let mut url = self.resolve(url)?;
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(options.query.iter());
        }

        debug!("{} {}", method, url.path());

        let mut request = self.client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = match options.body {
            Body::Empty => request,
            Body::Form(fields) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                request
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            Body::Json(value) => request
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(&value)?),
            Body::Raw {
                content_type,
                bytes,
            } => request.header(CONTENT_TYPE, content_type).body(bytes),
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builder for [`ReqwestTransport`].
///
/// Provides a fluent API for constructing the transport with:
/// - Base URI resolution
/// - Timeout configuration
/// - Optional transport-level retry with exponential backoff
pub struct ReqwestTransportBuilder {
    config: HttpClientConfig,
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_base_uri(mut self, base_uri: &str) -> Self {
        self.config.base_uri = base_uri.to_string();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Retry transient network failures inside the transport.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = Some(policy);
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Build the configured transport.
    pub fn build(self) -> Result<ReqwestTransport, Error> {
        // A base without a trailing slash would drop its last segment on join.
        let mut base = self.config.base_uri.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_uri = Url::parse(&base).map_err(|_| {
            http_error(
                HttpErrorKind::InvalidUrl,
                &format!("Invalid base URI: {}", self.config.base_uri),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let mut builder = ClientBuilder::new(client);
        if let Some(policy) = self.config.retry {
            builder = builder.with(RetryTransientMiddleware::new_with_policy(policy));
        }

        Ok(ReqwestTransport {
            client: builder.build(),
            base_uri,
        })
    }
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_builder_default() {
        let builder = ReqwestTransportBuilder::new();
        assert_eq!(builder.config.timeout, Duration::from_secs(30));
        assert_eq!(builder.config.base_uri, DEFAULT_BASE_URI);
        assert!(builder.config.retry.is_none());
    }

    #[test]
    fn test_builder_with_timeout() {
        let builder = ReqwestTransportBuilder::new().with_timeout(Duration::from_secs(60));
        assert_eq!(builder.config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_base_uri() {
        let result = ReqwestTransport::builder().with_base_uri("not a url").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve() {
        let transport = ReqwestTransport::builder()
            .with_base_uri("https://api.example.com/v1")
            .build()
            .unwrap();

        assert_eq!(
            transport.resolve("/users/me").unwrap().as_str(),
            "https://api.example.com/v1/users/me"
        );
        assert_eq!(
            transport.resolve("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[tokio::test]
    async fn test_send_form_with_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/oauth/token/")
            .match_query(Matcher::UrlEncoded("debug".into(), "1".into()))
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_header("x-trace", "abc")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"access_token":"t"}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::builder()
            .with_base_uri(&server.url())
            .build()
            .unwrap();

        let response = transport
            .send(
                Method::POST,
                "/v2/oauth/token/",
                RequestOptions::new()
                    .query("debug", "1")
                    .header("X-Trace", "abc")
                    .form(&[("grant_type", "client_credentials")]),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.text(), r#"{"access_token":"t"}"#);
    }

    #[tokio::test]
    async fn test_send_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/echo")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"a": 1})))
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let transport = ReqwestTransport::builder()
            .with_base_uri(&server.url())
            .build()
            .unwrap();

        let response = transport
            .send(Method::POST, "echo", RequestOptions::new().json(json!({"a": 1})))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 500);
        assert_eq!(response.body, b"boom");
    }
}
