//! Access token granted by a user who authorized the application.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::debug;

use super::{AccessToken, Credential, RefreshableAccessToken, TokenResponse};
use crate::error::{token_error, Error, ErrorKind, TokenErrorKind};
use crate::oauth::OAuthClient;

struct AuthorizerState {
    credential: Credential,
    refresh_token: Option<SecretString>,
}

/// A user's access token, optionally refreshable through OAuth.
///
/// Refreshing is possible only when an [`OAuthClient`] is attached and a
/// refresh token is known. Concurrent refreshes each exchange the refresh
/// token independently; the last one to finish is kept.
pub struct AuthorizerAccessToken {
    client_key: String,
    open_id: String,
    state: RwLock<AuthorizerState>,
    oauth: Option<Arc<OAuthClient>>,
}

impl AuthorizerAccessToken {
    pub fn new(client_key: &str, open_id: &str, credential: Credential) -> Self {
        Self {
            client_key: client_key.to_string(),
            open_id: open_id.to_string(),
            state: RwLock::new(AuthorizerState {
                credential,
                refresh_token: None,
            }),
            oauth: None,
        }
    }

    /// Build from a token endpoint response, keeping its refresh token.
    pub fn from_response(client_key: &str, response: &TokenResponse) -> Result<Self, Error> {
        let token = Self::new(
            client_key,
            response.open_id.as_deref().unwrap_or_default(),
            response.credential()?,
        );
        Ok(match &response.refresh_token {
            Some(refresh_token) if !refresh_token.is_empty() => {
                token.with_refresh_token(refresh_token)
            }
            _ => token,
        })
    }

    pub fn with_refresh_token(mut self, refresh_token: &str) -> Self {
        self.state.get_mut().refresh_token = Some(SecretString::new(refresh_token.to_string()));
        self
    }

    /// Attach the OAuth client used for refreshing.
    pub fn with_oauth(mut self, oauth: Arc<OAuthClient>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    pub fn open_id(&self) -> &str {
        &self.open_id
    }

    pub async fn refresh_token(&self) -> Option<SecretString> {
        self.state.read().await.refresh_token.clone()
    }

    fn can_refresh(&self) -> bool {
        self.oauth.is_some()
            && self
                .state
                .try_read()
                .map(|state| state.refresh_token.is_some())
                .unwrap_or(true)
    }
}

#[async_trait]
impl AccessToken for AuthorizerAccessToken {
    async fn credential(&self) -> Result<Credential, Error> {
        Ok(self.state.read().await.credential.clone())
    }

    fn as_refreshable(&self) -> Option<&dyn RefreshableAccessToken> {
        if self.can_refresh() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl RefreshableAccessToken for AuthorizerAccessToken {
    async fn refresh(&self) -> Result<Credential, Error> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            token_error(TokenErrorKind::RefreshFailed, "No OAuth client to refresh with")
        })?;
        let refresh_token = self.refresh_token().await.ok_or_else(|| {
            token_error(TokenErrorKind::RefreshFailed, "No refresh token available")
        })?;

        let response = oauth
            .refresh_authorizer_token(refresh_token.expose_secret(), &[])
            .await
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Token(TokenErrorKind::RefreshFailed),
            })?;
        let credential = response.credential()?;

        let mut state = self.state.write().await;
        state.credential = credential.clone();
        if let Some(rotated) = response.refresh_token.filter(|token| !token.is_empty()) {
            state.refresh_token = Some(SecretString::new(rotated));
        }

        debug!("Refreshed authorizer token for {}", self.open_id);
        Ok(credential)
    }
}
