//! HTTP client that attaches credentials and re-authenticates on expiry.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::presets::{Presets, Staged};
use super::response::{default_is_expired, default_is_failure};
use super::{HttpResponse, RequestOptions, RetryPolicy, Transport};
use crate::credential::AccessToken;
use crate::error::{remote_error, Error, RemoteErrorKind};

/// Predicate over a response body that recognizes an expired credential.
pub type ExpiryCheck = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Predicate deciding whether a response is a failure.
pub type FailureJudge = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// Decorates a [`Transport`] with credentials, retries and failure checks.
///
/// Each send carries `Authorization: Bearer <token>` from the attached
/// [`AccessToken`]. Responses with a retryable status, and transport errors,
/// are retried per the [`RetryPolicy`]. When a response body is recognized as
/// an expired credential and the token is refreshable, the token is refreshed
/// and the request sent once more; a second expiry is returned as is.
///
/// Per-request parameters are staged on a [`PendingRequest`] started with
/// [`CredentialedClient::with`] and friends, never on the client itself.
#[derive(Clone)]
pub struct CredentialedClient {
    transport: Arc<dyn Transport>,
    access_token: Option<Arc<dyn AccessToken>>,
    retry: RetryPolicy,
    is_expired: ExpiryCheck,
    failure_judge: FailureJudge,
    throw_on_failure: bool,
    presets: Presets,
}

impl CredentialedClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            access_token: None,
            retry: RetryPolicy::default(),
            is_expired: Arc::new(default_is_expired),
            failure_judge: Arc::new(default_is_failure),
            throw_on_failure: true,
            presets: Presets::default(),
        }
    }

    /// Use `access_token` for every request.
    pub fn with_credential(mut self, access_token: Arc<dyn AccessToken>) -> Self {
        self.access_token = Some(access_token);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_expiry_check<F>(mut self, is_expired: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.is_expired = Arc::new(is_expired);
        self
    }

    pub fn with_failure_judge<F>(mut self, failure_judge: F) -> Self
    where
        F: Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    {
        self.failure_judge = Arc::new(failure_judge);
        self
    }

    /// Named values available to [`CredentialedClient::with_preset`].
    pub fn with_presets(mut self, presets: HashMap<String, String>) -> Self {
        self.presets = Presets::new(presets);
        self
    }

    pub fn with_throw_on_failure(mut self, throw_on_failure: bool) -> Self {
        self.throw_on_failure = throw_on_failure;
        self
    }

    /// Return failed responses instead of failing.
    pub fn quietly(self) -> Self {
        self.with_throw_on_failure(false)
    }

    pub fn access_token(&self) -> Option<&Arc<dyn AccessToken>> {
        self.access_token.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start a request carrying the parameter `name`.
    pub fn with(&self, name: &str, value: impl Into<Value>) -> PendingRequest<'_> {
        PendingRequest::new(self).with(name, value)
    }

    /// Start a request carrying the preset `name`.
    pub fn with_preset(&self, name: &str) -> Result<PendingRequest<'_>, Error> {
        PendingRequest::new(self).with_preset(name)
    }

    /// Start a request carrying the preset `name`, sent as `alias`.
    pub fn with_preset_as(&self, name: &str, alias: &str) -> Result<PendingRequest<'_>, Error> {
        PendingRequest::new(self).with_preset_as(name, alias)
    }

    /// Start a request carrying a header.
    pub fn with_header(&self, name: &str, value: &str) -> PendingRequest<'_> {
        PendingRequest::new(self).with_header(name, value)
    }

    /// Send a request.
    ///
    /// # Returns
    ///
    /// The final response. Fails with `ErrorKind::Remote` when the response
    /// is judged a failure and failures are not quieted.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, Error> {
        self.send_staged(Staged::default(), method, url, options)
            .await
    }

    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, Error> {
        self.request(Method::GET, url, query_options(query)).await
    }

    /// POST a form.
    pub async fn post(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, Error> {
        self.request(Method::POST, url, RequestOptions::new().form(form))
            .await
    }

    pub async fn post_json(&self, url: &str, body: Value) -> Result<HttpResponse, Error> {
        self.request(Method::POST, url, RequestOptions::new().json(body))
            .await
    }

    async fn send_staged(
        &self,
        staged: Staged,
        method: Method,
        url: &str,
        mut options: RequestOptions,
    ) -> Result<HttpResponse, Error> {
        staged.apply(&method, &mut options);

        let response = self.send_with_retry(method, url, options).await?;

        if self.throw_on_failure && (self.failure_judge)(&response) {
            let kind = if response.status >= 400 {
                RemoteErrorKind::Status
            } else {
                RemoteErrorKind::ApiFailure
            };
            return Err(remote_error(kind, response.status, &response.body));
        }

        Ok(response)
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, Error> {
        let mut n_past_retries = 0;
        let mut refreshed = false;

        loop {
            let mut attempt = options.clone();
            if let Some(access_token) = &self.access_token {
                let credential = access_token.credential().await?;
                attempt.set_header("Authorization", &credential.bearer());
            }

            let result = self.transport.send(method.clone(), url, attempt).await;

            let expired = matches!(&result, Ok(response) if (self.is_expired)(&response.body));
            if expired {
                if refreshed {
                    debug!("Credential still rejected after refresh");
                    return result;
                }
                refreshed = true;

                let Some(refreshable) = self
                    .access_token
                    .as_ref()
                    .and_then(|access_token| access_token.as_refreshable())
                else {
                    return result;
                };

                match refreshable.refresh().await {
                    Ok(_) => {
                        debug!("Credential expired, retrying {} with a new one", url);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to refresh expired credential: {}", e);
                        return result;
                    }
                }
            }

            let decision = match &result {
                Ok(response) => self.retry.for_response(n_past_retries, response),
                Err(error) => self.retry.for_error(n_past_retries, error),
            };
            if !decision.should_retry {
                return result;
            }

            debug!(
                "Retrying {} in {:?} (retry {} of {})",
                url,
                decision.delay,
                n_past_retries + 1,
                self.retry.max_retries
            );
            tokio::time::sleep(decision.delay).await;
            n_past_retries += 1;
        }
    }
}

fn query_options(query: &[(&str, &str)]) -> RequestOptions {
    query
        .iter()
        .fold(RequestOptions::new(), |options, (name, value)| {
            options.query(name, value)
        })
}

/// A single request under construction on a [`CredentialedClient`].
///
/// Staged values belong to this builder alone and are merged into the
/// request it sends; values already present on the request win.
#[must_use = "a pending request does nothing until it is sent"]
pub struct PendingRequest<'a> {
    client: &'a CredentialedClient,
    staged: Staged,
}

impl<'a> PendingRequest<'a> {
    fn new(client: &'a CredentialedClient) -> Self {
        Self {
            client,
            staged: Staged::default(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.staged.param(name, value.into());
        self
    }

    pub fn with_preset(mut self, name: &str) -> Result<Self, Error> {
        self.client.presets.stage_into(&mut self.staged, name, None)?;
        Ok(self)
    }

    pub fn with_preset_as(mut self, name: &str, alias: &str) -> Result<Self, Error> {
        self.client
            .presets
            .stage_into(&mut self.staged, name, Some(alias))?;
        Ok(self)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.staged.header(name, value);
        self
    }

    pub fn staged(&self) -> &Staged {
        &self.staged
    }

    pub async fn request(
        self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, Error> {
        self.client
            .send_staged(self.staged, method, url, options)
            .await
    }

    pub async fn get(self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, Error> {
        self.request(Method::GET, url, query_options(query)).await
    }

    pub async fn post(self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, Error> {
        self.request(Method::POST, url, RequestOptions::new().form(form))
            .await
    }

    pub async fn post_json(self, url: &str, body: Value) -> Result<HttpResponse, Error> {
        self.request(Method::POST, url, RequestOptions::new().json(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, RefreshableAccessToken, StaticAccessToken};
    use crate::error::{http_error, token_error, ErrorKind, HttpErrorKind, TokenErrorKind};
    use crate::http::Body;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const EXPIRED: &str = r#"{"errcode":42001,"errmsg":"access_token expired"}"#;

    /// Replays scripted responses and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<HttpResponse, Error>>>,
        sent: Mutex<Vec<(Method, String, RequestOptions)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse, Error>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(Method, String, RequestOptions)> {
            self.sent.lock().unwrap().clone()
        }

        fn authorization(&self, index: usize) -> String {
            self.sent()[index]
                .2
                .headers
                .iter()
                .find(|(name, _)| name == "Authorization")
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            method: Method,
            url: &str,
            options: RequestOptions,
        ) -> Result<HttpResponse, Error> {
            self.sent
                .lock()
                .unwrap()
                .push((method, url.to_string(), options));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    /// Hands out `act.<n>` and bumps `n` on every refresh.
    struct CountingToken {
        generation: AtomicUsize,
        refreshes: AtomicUsize,
        fail_refresh: bool,
    }

    impl CountingToken {
        fn new(fail_refresh: bool) -> Arc<Self> {
            Arc::new(Self {
                generation: AtomicUsize::new(1),
                refreshes: AtomicUsize::new(0),
                fail_refresh,
            })
        }
    }

    #[async_trait]
    impl AccessToken for CountingToken {
        async fn credential(&self) -> Result<Credential, Error> {
            Credential::new(format!("act.{}", self.generation.load(Ordering::SeqCst)), 60)
        }

        fn as_refreshable(&self) -> Option<&dyn RefreshableAccessToken> {
            Some(self)
        }
    }

    #[async_trait]
    impl RefreshableAccessToken for CountingToken {
        async fn refresh(&self) -> Result<Credential, Error> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(token_error(TokenErrorKind::RefreshFailed, "refresh rejected"));
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.credential().await
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(0.0)
    }

    fn client(transport: Arc<ScriptedTransport>, token: Arc<dyn AccessToken>) -> CredentialedClient {
        CredentialedClient::new(transport)
            .with_credential(token)
            .with_retry_policy(fast_retry())
    }

    fn json_response(status: u16, body: &str) -> Result<HttpResponse, Error> {
        Ok(HttpResponse::new(status, body).with_header("content-type", "application/json"))
    }

    #[tokio::test]
    async fn test_attaches_bearer_header() {
        let transport = ScriptedTransport::new(vec![json_response(200, r#"{"errcode":0}"#)]);
        let token = Arc::new(StaticAccessToken::new(Credential::new("act.x", 60).unwrap()));

        let response = client(transport.clone(), token)
            .get("/v2/user/info/", &[("fields", "open_id")])
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.authorization(0), "Bearer act.x");
        assert_eq!(
            transport.sent()[0].2.query,
            vec![("fields".to_string(), "open_id".to_string())]
        );
    }

    #[tokio::test]
    async fn test_refreshes_once_on_expiry_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, EXPIRED),
            json_response(200, r#"{"errcode":0,"data":1}"#),
        ]);
        let token = CountingToken::new(false);

        let response = client(transport.clone(), token.clone())
            .post_json("/v2/video/list/", json!({"max_count": 10}))
            .await
            .unwrap();

        assert_eq!(response.text(), r#"{"errcode":0,"data":1}"#);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.authorization(0), "Bearer act.1");
        assert_eq!(transport.authorization(1), "Bearer act.2");
    }

    #[tokio::test]
    async fn test_second_expiry_stops() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, EXPIRED),
            json_response(200, EXPIRED),
            json_response(200, r#"{"errcode":0}"#),
        ]);
        let token = CountingToken::new(false);

        let err = client(transport.clone(), token.clone())
            .get("/cgi-bin/x", &[])
            .await
            .unwrap_err();

        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(err.error_kind, ErrorKind::Remote(RemoteErrorKind::ApiFailure));
        assert!(err.response_body().unwrap().body.contains("42001"));
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_original_response() {
        let transport = ScriptedTransport::new(vec![json_response(200, EXPIRED)]);
        let token = CountingToken::new(true);

        let response = client(transport.clone(), token.clone())
            .quietly()
            .get("/cgi-bin/x", &[])
            .await
            .unwrap();

        assert_eq!(response.text(), EXPIRED);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_with_static_token_is_not_retried() {
        let transport = ScriptedTransport::new(vec![json_response(200, EXPIRED)]);
        let token = Arc::new(StaticAccessToken::new(Credential::new("act.x", 60).unwrap()));

        let result = client(transport.clone(), token).get("/x", &[]).await;

        assert!(result.is_err());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_expiry_check() {
        let transport = ScriptedTransport::new(vec![
            json_response(401, r#"{"error":{"code":"access_token_invalid"}}"#),
            json_response(200, r#"{"error":{"code":"ok"}}"#),
        ]);
        let token = CountingToken::new(false);

        let response = client(transport.clone(), token.clone())
            .with_expiry_check(|body| String::from_utf8_lossy(body).contains("access_token_invalid"))
            .get("/v2/user/info/", &[])
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_statuses() {
        let transport = ScriptedTransport::new(vec![
            json_response(503, "{}"),
            Ok(HttpResponse::new(429, "").with_header("retry-after", "0")),
            json_response(200, r#"{"errcode":0}"#),
        ]);
        let token = CountingToken::new(false);

        let response = client(transport.clone(), token.clone())
            .get("/x", &[])
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let transport = ScriptedTransport::new(vec![
            json_response(500, "{}"),
            json_response(500, "{}"),
            json_response(500, "{}"),
            json_response(500, "{}"),
            json_response(200, "{}"),
        ]);
        let token = CountingToken::new(false);

        let err = client(transport.clone(), token)
            .get("/x", &[])
            .await
            .unwrap_err();

        assert_eq!(transport.sent().len(), 4);
        assert_eq!(err.error_kind, ErrorKind::Remote(RemoteErrorKind::Status));
        assert_eq!(err.response_body().unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_retries_transport_errors() {
        let transport = ScriptedTransport::new(vec![
            Err(http_error(HttpErrorKind::Network, "connection reset")),
            json_response(200, "{}"),
        ]);
        let token = CountingToken::new(false);

        let response = client(transport.clone(), token).get("/x", &[]).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_api_failure_inside_200() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, r#"{"errcode":40001,"errmsg":"invalid credential"}"#),
            json_response(200, r#"{"errcode":40001,"errmsg":"invalid credential"}"#),
        ]);
        let token = CountingToken::new(false);
        let client = client(transport.clone(), token);

        let err = client.get("/x", &[]).await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Remote(RemoteErrorKind::ApiFailure));
        assert!(err.response_body().unwrap().body.contains("invalid credential"));

        let response = client.clone().quietly().get("/x", &[]).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_presets_apply_to_their_own_request_only() {
        let transport = ScriptedTransport::new(vec![
            json_response(200, "{}"),
            json_response(200, "{}"),
        ]);
        let token = CountingToken::new(false);
        let client = client(transport.clone(), token)
            .with_presets(HashMap::from([("client_key".to_string(), "ck".to_string())]));

        client
            .with("page", 2)
            .with_preset("client_key")
            .unwrap()
            .with_header("X-Trace", "t-1")
            .post("/x", &[("page", "5")])
            .await
            .unwrap();
        client.post("/x", &[]).await.unwrap();

        let sent = transport.sent();
        assert_eq!(
            sent[0].2.body,
            Body::Form(vec![
                ("page".to_string(), "5".to_string()),
                ("client_key".to_string(), "ck".to_string()),
            ])
        );
        assert!(sent[0].2.has_header("x-trace"));
        assert_eq!(sent[1].2.body, Body::Form(vec![]));
        assert!(!sent[1].2.has_header("x-trace"));
    }

    #[tokio::test]
    async fn test_unsent_pending_request_leaves_client_untouched() {
        let transport = ScriptedTransport::new(vec![json_response(200, "{}")]);
        let client = CredentialedClient::new(transport.clone());

        let pending = client.with("page", 2);
        assert!(!pending.staged().is_empty());
        drop(pending);
        client.get("/x", &[]).await.unwrap();

        assert!(transport.sent()[0].2.query.is_empty());
    }

    #[tokio::test]
    async fn test_shared_client_keeps_callers_apart() {
        let transport = ScriptedTransport::new(vec![]);
        let client = Arc::new(CredentialedClient::new(transport.clone()));

        let first = client.with("open_id", "user-a").with_header("X-Caller", "a");
        let second = client.with("open_id", "user-b");
        client.get("/unrelated", &[]).await.unwrap();

        let shared = client.clone();
        let (b, a) = tokio::join!(
            tokio::spawn(async move {
                shared
                    .with("open_id", "user-b-task")
                    .get("/task-b", &[])
                    .await
            }),
            first.get("/task-a", &[("fields", "open_id")]),
        );
        b.unwrap().unwrap();
        a.unwrap();
        second.get("/second", &[]).await.unwrap();

        let query_of = |url: &str| {
            transport
                .sent()
                .into_iter()
                .find(|(_, sent_url, _)| sent_url == url)
                .map(|(_, _, options)| options)
                .unwrap()
        };
        assert!(query_of("/unrelated").query.is_empty());
        assert!(!query_of("/unrelated").has_header("x-caller"));
        assert_eq!(
            query_of("/task-a").query,
            vec![
                ("fields".to_string(), "open_id".to_string()),
                ("open_id".to_string(), "user-a".to_string()),
            ]
        );
        assert!(query_of("/task-a").has_header("x-caller"));
        assert_eq!(
            query_of("/task-b").query,
            vec![("open_id".to_string(), "user-b-task".to_string())]
        );
        assert!(!query_of("/task-b").has_header("x-caller"));
        assert_eq!(
            query_of("/second").query,
            vec![("open_id".to_string(), "user-b".to_string())]
        );
    }

    #[test]
    fn test_unknown_preset() {
        let client = CredentialedClient::new(ScriptedTransport::new(vec![]));
        assert!(matches!(
            client.with_preset_as("missing", "alias"),
            Err(Error {
                error_kind: ErrorKind::Http(HttpErrorKind::InvalidPreset),
                ..
            })
        ));
    }
}
