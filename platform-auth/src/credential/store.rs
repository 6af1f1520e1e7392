//! Client-credential access token with caching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AccessToken, Credential, RefreshableAccessToken, TokenResponse};
use crate::cache::{get_readable, Cache};
use crate::error::{token_fetch_error, Error};
use crate::http::{RequestOptions, Transport};

/// Default token endpoint, relative to the API base URI.
pub const DEFAULT_TOKEN_PATH: &str = "/v2/oauth/token/";

/// Obtains and caches the application's own access token.
///
/// The cache is the authority on validity: a missing or unreadable entry
/// means a new token is fetched with the client-credentials grant and stored
/// for the `expires_in` the server reports.
///
/// Fetches for the same cache key are serialized within the process, so a
/// burst of concurrent misses results in one token request. Separate
/// processes sharing a cache may each fetch once; the last write wins.
pub struct CredentialStore {
    client_key: String,
    client_secret: SecretString,
    token_path: String,
    cache_key: Option<String>,
    cache: Arc<dyn Cache>,
    transport: Arc<dyn Transport>,
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialStore {
    pub fn new(
        client_key: &str,
        client_secret: SecretString,
        cache: Arc<dyn Cache>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            client_key: client_key.to_string(),
            client_secret,
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            cache_key: None,
            cache,
            transport,
            fetch_locks: DashMap::new(),
        }
    }

    pub fn with_token_path(mut self, token_path: &str) -> Self {
        self.token_path = token_path.to_string();
        self
    }

    /// Override the derived cache key.
    pub fn with_cache_key(mut self, cache_key: &str) -> Self {
        self.cache_key = Some(cache_key.to_string());
        self
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// `client.access_token.<client_key>.<hex(sha256(client_key:client_secret))>`
    /// unless overridden.
    pub fn cache_key(&self) -> String {
        if let Some(key) = &self.cache_key {
            return key.clone();
        }

        let digest = Sha256::digest(format!(
            "{}:{}",
            self.client_key,
            self.client_secret.expose_secret()
        ));
        format!("client.access_token.{}.{}", self.client_key, hex::encode(digest))
    }

    /// Current credential, fetching a new one on a cache miss.
    pub async fn get(&self) -> Result<Credential, Error> {
        let key = self.cache_key();

        if let Some(credential) = self.read_cached(&key).await? {
            return Ok(credential);
        }

        let lock = self
            .fetch_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have fetched while we waited.
        if let Some(credential) = self.read_cached(&key).await? {
            debug!("Access token was fetched by another request");
            return Ok(credential);
        }

        let mut response = self.fetch().await?;
        response.issued_at = Some(Utc::now().timestamp());
        let credential = response.credential()?;

        self.cache
            .set(
                &key,
                serde_json::to_vec(&response)?,
                Duration::from_secs(response.expires_in),
            )
            .await?;

        debug!(
            "Stored access token for {} (expires in {}s)",
            self.client_key, response.expires_in
        );
        Ok(credential)
    }

    /// Store a token obtained elsewhere.
    pub async fn set_token(&self, access_token: &str, expires_in: u64) -> Result<Credential, Error> {
        let response = TokenResponse {
            access_token: access_token.to_string(),
            expires_in,
            issued_at: Some(Utc::now().timestamp()),
            ..TokenResponse::default()
        };
        let credential = response.credential()?;

        self.cache
            .set(
                &self.cache_key(),
                serde_json::to_vec(&response)?,
                Duration::from_secs(expires_in),
            )
            .await?;
        Ok(credential)
    }

    /// Evict the cached credential.
    pub async fn forget(&self) -> Result<(), Error> {
        self.cache.delete(&self.cache_key()).await
    }

    async fn read_cached(&self, key: &str) -> Result<Option<Credential>, Error> {
        let Some(bytes) = get_readable(self.cache.as_ref(), key).await? else {
            return Ok(None);
        };

        match TokenResponse::parse(&bytes).map(|response| response.credential()) {
            Some(Ok(credential)) => Ok(Some(credential)),
            _ => {
                warn!("Ignoring unreadable cached access token for {}", self.client_key);
                Ok(None)
            }
        }
    }

    async fn fetch(&self) -> Result<TokenResponse, Error> {
        debug!("Requesting access token for {}", self.client_key);

        let options = RequestOptions::new().form(&[
            ("grant_type", "client_credentials"),
            ("client_key", self.client_key.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
        ]);
        let response = self
            .transport
            .send(Method::POST, &self.token_path, options)
            .await?;

        TokenResponse::parse(&response.body).ok_or_else(|| {
            warn!(
                "Token request for {} failed with status {}",
                self.client_key, response.status
            );
            token_fetch_error(response.status, &response.body)
        })
    }
}

#[async_trait]
impl AccessToken for CredentialStore {
    async fn credential(&self) -> Result<Credential, Error> {
        self.get().await
    }

    fn as_refreshable(&self) -> Option<&dyn RefreshableAccessToken> {
        Some(self)
    }
}

#[async_trait]
impl RefreshableAccessToken for CredentialStore {
    async fn refresh(&self) -> Result<Credential, Error> {
        self.forget().await?;
        self.get().await
    }
}
