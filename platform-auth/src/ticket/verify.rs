//! Storage for the verify ticket pushed by the platform.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{get_readable, Cache};
use crate::error::{token_error, Error, TokenErrorKind};

/// How long a pushed ticket is kept.
pub const VERIFY_TICKET_TTL: Duration = Duration::from_secs(6000);

/// The latest `component_verify_ticket` for an application.
pub struct VerifyTicket {
    client_key: String,
    key: Option<String>,
    cache: Arc<dyn Cache>,
}

impl VerifyTicket {
    pub fn new(client_key: &str, cache: Arc<dyn Cache>) -> Self {
        Self {
            client_key: client_key.to_string(),
            key: None,
            cache,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("open_platform.verify_ticket.{}", self.client_key))
    }

    pub async fn set_ticket(&self, ticket: &str) -> Result<(), Error> {
        debug!("Storing verify ticket for {}", self.client_key);
        self.cache
            .set(&self.key(), ticket.as_bytes().to_vec(), VERIFY_TICKET_TTL)
            .await
    }

    /// The stored ticket. Fails with `TokenErrorKind::NotFound` when none has
    /// been pushed yet or it has expired.
    pub async fn get_ticket(&self) -> Result<String, Error> {
        get_readable(self.cache.as_ref(), &self.key())
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|ticket| !ticket.is_empty())
            .ok_or_else(|| {
                token_error(TokenErrorKind::NotFound, "No component_verify_ticket found.")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EncryptedCache, MemoryCache};
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_set_and_get() {
        let ticket = VerifyTicket::new("ck", Arc::new(MemoryCache::new()));
        assert_eq!(ticket.key(), "open_platform.verify_ticket.ck");

        ticket.set_ticket("ticket@@@1").await.unwrap();
        assert_eq!(ticket.get_ticket().await.unwrap(), "ticket@@@1");
    }

    #[tokio::test]
    async fn test_missing_ticket_is_not_found() {
        let ticket = VerifyTicket::new("ck", Arc::new(MemoryCache::new())).with_key("custom");
        assert_eq!(ticket.key(), "custom");

        let err = ticket.get_ticket().await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_undecryptable_ticket_is_not_found_and_replaceable() {
        let backing = Arc::new(MemoryCache::new());
        backing
            .set(
                "open_platform.verify_ticket.ck",
                b"garbage-from-old-key".to_vec(),
                VERIFY_TICKET_TTL,
            )
            .await
            .unwrap();
        let ticket = VerifyTicket::new(
            "ck",
            Arc::new(EncryptedCache::new(backing.clone(), &"33".repeat(32)).unwrap()),
        );

        let err = ticket.get_ticket().await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Token(TokenErrorKind::NotFound));
        assert_eq!(backing.get("open_platform.verify_ticket.ck").await.unwrap(), None);

        ticket.set_ticket("ticket@@@2").await.unwrap();
        assert_eq!(ticket.get_ticket().await.unwrap(), "ticket@@@2");
    }
}
