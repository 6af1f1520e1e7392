//! Error types for the `platform-auth` crate.
//!
//! Follows the same pattern as the rest of the workspace: a root Error struct
//! holding an error kind tree and an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for platform-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in platform-auth.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Token(TokenErrorKind),
    Webhook(WebhookErrorKind),
    Cipher(CipherErrorKind),
    Remote(RemoteErrorKind),
    Http(HttpErrorKind),
    Cache(CacheErrorKind),
}

/// Errors from obtaining or refreshing credentials and tickets.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    /// The credential exchange failed or returned no token.
    FetchFailed,
    /// A refreshable credential could not be refreshed.
    RefreshFailed,
    /// Nothing has been stored under the expected key.
    NotFound,
    /// A token value was empty or malformed.
    Invalid,
}

/// Errors from inbound webhook authentication and parsing.
#[derive(Debug, PartialEq)]
pub enum WebhookErrorKind {
    InvalidSignature,
    IdentityMismatch,
    InvalidPayload,
    MissingField,
}

/// Errors from the message cipher.
#[derive(Debug, PartialEq)]
pub enum CipherErrorKind {
    InvalidKey,
    EncryptionFailed,
    DecryptionFailed,
}

/// The remote API answered, but the answer is a failure.
#[derive(Debug, PartialEq)]
pub enum RemoteErrorKind {
    /// A 2xx response whose envelope reports an error.
    ApiFailure,
    /// A 4xx/5xx response.
    Status,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
    InvalidUrl,
    InvalidPreset,
    EmptyBody,
    Decode,
}

/// Errors from cache backends.
#[derive(Debug, PartialEq)]
pub enum CacheErrorKind {
    Backend,
    Serialization,
    EncryptionFailed,
    DecryptionFailed,
}

/// Raw status and body of a response kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.body)
    }
}

impl StdError for ResponseBody {}

impl Error {
    /// The response that caused this error, when there was one.
    pub fn response_body(&self) -> Option<&ResponseBody> {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<ResponseBody>())
    }

    /// Network-level failures that a retry policy may try again.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Http(HttpErrorKind::Network) | ErrorKind::Http(HttpErrorKind::RequestFailed)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let detail = self
            .source
            .as_ref()
            .map(|source| format!(" ({})", source))
            .unwrap_or_default();

        match &self.error_kind {
            ErrorKind::Token(kind) => write!(f, "Token error: {:?}{}", kind, detail),
            ErrorKind::Webhook(kind) => write!(f, "Webhook error: {:?}{}", kind, detail),
            ErrorKind::Cipher(kind) => write!(f, "Cipher error: {:?}{}", kind, detail),
            ErrorKind::Remote(kind) => write!(f, "Remote API error: {:?}{}", kind, detail),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}{}", kind, detail),
            ErrorKind::Cache(kind) => write!(f, "Cache error: {:?}{}", kind, detail),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else if err.is_decode() {
            ErrorKind::Http(HttpErrorKind::Decode)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(other.into()),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Http(HttpErrorKind::Decode),
        }
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function for a failed credential exchange that keeps the raw response.
pub fn token_fetch_error(status: u16, body: &[u8]) -> Error {
    Error {
        source: Some(Box::new(ResponseBody {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        })),
        error_kind: ErrorKind::Token(TokenErrorKind::FetchFailed),
    }
}

/// Helper function to create webhook errors.
pub fn webhook_error(kind: WebhookErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Webhook(kind),
    }
}

/// Helper function to create cipher errors.
pub fn cipher_error(kind: CipherErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Cipher(kind),
    }
}

/// Helper function to create remote API errors carrying the response body.
pub fn remote_error(kind: RemoteErrorKind, status: u16, body: &[u8]) -> Error {
    Error {
        source: Some(Box::new(ResponseBody {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        })),
        error_kind: ErrorKind::Remote(kind),
    }
}

/// Helper function to create HTTP errors.
pub fn http_error(kind: HttpErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Http(kind),
    }
}

/// Helper function to create cache errors.
pub fn cache_error(kind: CacheErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Cache(kind),
    }
}
