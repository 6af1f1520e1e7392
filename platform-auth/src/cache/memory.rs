//! In-process cache with per-entry deadlines.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::Cache;
use crate::error::Error;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Default [`Cache`] used when nothing else is injected.
///
/// Entries are evicted lazily on read; call [`MemoryCache::purge_expired`]
/// periodically for long-running processes with many keys.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose deadline has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }

        // Expired: remove only if nobody replaced it in the meantime.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }
}
