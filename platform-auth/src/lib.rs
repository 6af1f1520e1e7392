//! # platform-auth
//!
//! Credentialed request pipeline for the open-platform API:
//! - Access-token lifecycle with caching and on-demand refresh
//! - An HTTP decorator that injects credentials and retries once after a refresh
//! - OAuth authorization-code and refresh grants for authorizing users
//! - Signed, encrypted webhook deliveries dispatched through a handler chain
//! - JS-SDK and verify tickets
//!
//! ## Architecture
//!
//! Collaborators are injected as trait objects: a [`cache::Cache`] for token
//! and ticket storage and an [`http::Transport`] for the wire. The `service`
//! crate wires them together once at start-up.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use platform_auth::{
//!     cache::MemoryCache,
//!     credential::CredentialStore,
//!     http::{CredentialedClient, ReqwestTransport},
//! };
//!
//! let transport = Arc::new(ReqwestTransport::builder().build()?);
//! let store = Arc::new(CredentialStore::new(key, secret, Arc::new(MemoryCache::new()), transport.clone()));
//! let client = CredentialedClient::new(transport).with_credential(store);
//! let response = client.get("/v2/user/info/", &[("fields", "open_id")]).await?;
//! ```

pub mod cache;
pub mod cipher;
pub mod credential;
pub mod error;
pub mod http;
pub mod oauth;
pub mod signature;
pub mod ticket;
pub mod webhook;

// Re-export commonly used types
pub use cipher::{EncryptedEnvelope, MessageCipher};
pub use credential::{AccessToken, Credential, CredentialStore, RefreshableAccessToken};
pub use error::{Error, ErrorKind};
pub use http::{CredentialedClient, ReqwestTransport, RetryPolicy};
pub use signature::SignatureCodec;
pub use webhook::{HandlerChain, InboundMessage, WebhookServer};
