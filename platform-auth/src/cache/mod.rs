//! Key-value cache abstraction backing credential and ticket storage.

mod encrypted;
mod memory;

pub use encrypted::EncryptedCache;
pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{CacheErrorKind, Error, ErrorKind};

/// Trait for storing short-lived payloads with a time to live.
///
/// Any key-value store with TTL support satisfies this. The cache, not any
/// in-memory flag, is the authority on whether a credential is still valid,
/// so implementations shared between processes are fine.
///
/// Implementations should:
/// - Treat a zero `ttl` as "do not keep"
/// - Return `Ok(None)` for missing and expired keys alike
/// - Handle concurrent access safely
#[async_trait]
pub trait Cache: Send + Sync {
    /// Retrieve the payload stored under `key`.
    ///
    /// # Returns
    ///
    /// `Some(bytes)` if present and not expired, `None` otherwise.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Store a payload under `key` for `ttl`.
    ///
    /// # Arguments
    ///
    /// * `key` - Cache key
    /// * `value` - Raw payload bytes
    /// * `ttl` - How long the payload stays readable
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error>;

    /// Delete the payload stored under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;
}

/// Read `key`, treating an entry that cannot be decoded as a miss.
///
/// Such an entry (corrupt, or sealed under a rotated key) is evicted so the
/// caller can fetch and store a fresh one. Backend failures still propagate.
pub async fn get_readable(cache: &dyn Cache, key: &str) -> Result<Option<Vec<u8>>, Error> {
    match cache.get(key).await {
        Ok(value) => Ok(value),
        Err(e)
            if matches!(
                e.error_kind,
                ErrorKind::Cache(CacheErrorKind::DecryptionFailed | CacheErrorKind::Serialization)
            ) =>
        {
            warn!("Evicting unreadable cache entry {}: {}", key, e);
            cache.delete(key).await?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
