//! Access credentials and the traits that hand them out.

mod authorizer;
mod store;

pub use authorizer::AuthorizerAccessToken;
pub use store::{CredentialStore, DEFAULT_TOKEN_PATH};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{token_error, Error, TokenErrorKind};

/// An issued access token.
///
/// Immutable once issued; a credential is never empty.
#[derive(Debug, Clone)]
pub struct Credential {
    value: SecretString,
    issued_at: DateTime<Utc>,
    expires_in: u64,
}

impl Credential {
    /// Create a credential issued now.
    ///
    /// # Arguments
    ///
    /// * `value` - Token value, must not be empty
    /// * `expires_in` - Lifetime in seconds
    pub fn new(value: impl Into<String>, expires_in: u64) -> Result<Self, Error> {
        Self::issued(value, Utc::now(), expires_in)
    }

    pub fn issued(
        value: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in: u64,
    ) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(token_error(TokenErrorKind::Invalid, "Access token is empty"));
        }

        Ok(Self {
            value: SecretString::new(value),
            issued_at,
            expires_in,
        })
    }

    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in.min(i64::MAX as u64) as i64)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }

    /// Query parameter form of the credential.
    pub fn to_query(&self) -> (&'static str, String) {
        ("access_token", self.expose().to_string())
    }
}

/// Something that can hand out the current credential.
#[async_trait]
pub trait AccessToken: Send + Sync {
    async fn credential(&self) -> Result<Credential, Error>;

    /// The refreshable view of this token, if it supports refreshing.
    fn as_refreshable(&self) -> Option<&dyn RefreshableAccessToken> {
        None
    }
}

/// An [`AccessToken`] that can replace its credential on demand.
#[async_trait]
pub trait RefreshableAccessToken: AccessToken {
    /// Obtain a new credential, replacing the current one.
    async fn refresh(&self) -> Result<Credential, Error>;
}

/// A fixed credential that is never refreshed.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(Credential);

impl StaticAccessToken {
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }
}

#[async_trait]
impl AccessToken for StaticAccessToken {
    async fn credential(&self) -> Result<Credential, Error> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<T: AccessToken + ?Sized> AccessToken for Arc<T> {
    async fn credential(&self) -> Result<Credential, Error> {
        (**self).credential().await
    }

    fn as_refreshable(&self) -> Option<&dyn RefreshableAccessToken> {
        (**self).as_refreshable()
    }
}

/// Token endpoint response.
///
/// Fields the platform adds beyond these are kept in `extra` so the record
/// can be cached and returned as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, deserialize_with = "de_seconds")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Unix time the token was stored, added when caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenResponse {
    /// Parse a token record, returning `None` for anything that is not JSON
    /// or carries no access token.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let response: Self = serde_json::from_slice(body).ok()?;
        if response.access_token.trim().is_empty() {
            return None;
        }
        Some(response)
    }

    pub fn credential(&self) -> Result<Credential, Error> {
        let issued_at = self
            .issued_at
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
            .unwrap_or_else(Utc::now);
        Credential::issued(self.access_token.clone(), issued_at, self.expires_in)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl NumberOrString {
    fn seconds(self) -> Option<u64> {
        match self {
            NumberOrString::Number(n) => Some(n),
            NumberOrString::Signed(n) => u64::try_from(n).ok(),
            NumberOrString::Float(n) if n >= 0.0 => Some(n as u64),
            NumberOrString::Float(_) => None,
            NumberOrString::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Seconds given as a number or a numeric string. Anything else reads as zero.
pub(crate) fn de_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<NumberOrString>::deserialize(deserializer)?
        .and_then(NumberOrString::seconds)
        .unwrap_or(0))
}

pub(crate) fn de_opt_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    Ok(Option::<NumberOrString>::deserialize(deserializer)?.and_then(NumberOrString::seconds))
}
