//! OAuth 2.0 authorization-code flow for user authorizers.
//!
//! Builds the pre-authorization URL the user is redirected to, then exchanges
//! the returned code (or a later refresh token) for authorizer tokens at the
//! platform token endpoint.

use std::sync::Arc;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use url::Url;

use crate::credential::{AuthorizerAccessToken, TokenResponse, DEFAULT_TOKEN_PATH};
use crate::error::{http_error, token_fetch_error, Error, HttpErrorKind};
use crate::http::{RequestOptions, Transport};

/// Where users are sent to grant access.
pub const AUTHORIZE_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";

/// OAuth client for one application.
pub struct OAuthClient {
    client_key: String,
    client_secret: SecretString,
    transport: Arc<dyn Transport>,
    token_path: String,
    authorize_url: String,
}

impl OAuthClient {
    pub fn new(client_key: &str, client_secret: SecretString, transport: Arc<dyn Transport>) -> Self {
        Self {
            client_key: client_key.to_string(),
            client_secret,
            transport,
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
        }
    }

    pub fn with_token_path(mut self, token_path: &str) -> Self {
        self.token_path = token_path.to_string();
        self
    }

    pub fn with_authorize_url(mut self, authorize_url: &str) -> Self {
        self.authorize_url = authorize_url.to_string();
        self
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// URL that asks the user to authorize `scopes`.
    ///
    /// # Arguments
    ///
    /// * `scopes` - Requested scopes, sent comma separated
    /// * `redirect_uri` - Where the platform sends the authorization code
    /// * `extra` - Additional query parameters (e.g. `state`); the standard
    ///   parameters take precedence over same-named extras
    pub fn pre_authorization_url(
        &self,
        scopes: &[&str],
        redirect_uri: &str,
        extra: &[(&str, &str)],
    ) -> Result<String, Error> {
        let mut url = Url::parse(&self.authorize_url).map_err(|_| {
            http_error(
                HttpErrorKind::InvalidUrl,
                &format!("Invalid authorize URL: {}", self.authorize_url),
            )
        })?;

        let scope = scopes.join(",");
        let standard = [
            ("client_key", self.client_key.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
        ];

        url.query_pairs_mut()
            .extend_pairs(without_overridden(extra, &standard))
            .extend_pairs(standard.iter());

        Ok(url.into())
    }

    /// Exchange an authorization code for authorizer tokens.
    pub async fn authorizer_token(
        &self,
        code: &str,
        redirect_uri: &str,
        extra: &[(&str, &str)],
    ) -> Result<TokenResponse, Error> {
        let secret = self.client_secret.expose_secret();
        self.request_token(
            &[
                ("client_key", self.client_key.as_str()),
                ("client_secret", secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ],
            extra,
        )
        .await
    }

    /// Exchange a refresh token for new authorizer tokens.
    pub async fn refresh_authorizer_token(
        &self,
        refresh_token: &str,
        extra: &[(&str, &str)],
    ) -> Result<TokenResponse, Error> {
        let secret = self.client_secret.expose_secret();
        self.request_token(
            &[
                ("client_key", self.client_key.as_str()),
                ("client_secret", secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            extra,
        )
        .await
    }

    /// Exchange a code and wrap the result as a refreshable access token.
    pub async fn authorize(
        self: &Arc<Self>,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizerAccessToken, Error> {
        let response = self.authorizer_token(code, redirect_uri, &[]).await?;
        AuthorizerAccessToken::from_response(&self.client_key, &response)
            .map(|token| token.with_oauth(self.clone()))
    }

    async fn request_token(
        &self,
        standard: &[(&str, &str)],
        extra: &[(&str, &str)],
    ) -> Result<TokenResponse, Error> {
        let mut fields: Vec<(&str, &str)> = without_overridden(extra, standard).copied().collect();
        fields.extend_from_slice(standard);

        let response = self
            .transport
            .send(
                Method::POST,
                &self.token_path,
                RequestOptions::new().form(&fields),
            )
            .await?;

        match TokenResponse::parse(&response.body) {
            Some(token) => {
                debug!("Obtained authorizer token for {}", self.client_key);
                Ok(token)
            }
            None => {
                warn!(
                    "Authorizer token request failed with status {}",
                    response.status
                );
                Err(token_fetch_error(response.status, &response.body))
            }
        }
    }
}

fn without_overridden<'a>(
    extra: &'a [(&'a str, &'a str)],
    standard: &'a [(&'a str, &'a str)],
) -> impl Iterator<Item = &'a (&'a str, &'a str)> + 'a {
    extra
        .iter()
        .filter(move |(name, _)| standard.iter().all(|(fixed, _)| fixed != name))
}
