//! AES-256-GCM encryption for cached payloads at rest.
//!
//! Wraps any [`Cache`] so that credential responses never reach the backing
//! store in plaintext. The encryption key is a 32-byte key provided as a
//! hex-encoded string (64 characters).

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::Rng;

use super::Cache;
use crate::error::{cache_error, CacheErrorKind, Error};

/// 12-byte nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

/// Cache decorator that encrypts values before handing them to the inner cache.
pub struct EncryptedCache {
    inner: Arc<dyn Cache>,
    cipher: Aes256Gcm,
}

impl EncryptedCache {
    /// Wrap `inner`, encrypting with the hex-encoded 32-byte `key_hex`.
    pub fn new(inner: Arc<dyn Cache>, key_hex: &str) -> Result<Self, Error> {
        let key = parse_key(key_hex)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
            cache_error(CacheErrorKind::EncryptionFailed, "Invalid cache encryption key")
        })?;

        Ok(Self { inner, cipher })
    }

    /// Encrypts with a random nonce; the nonce is prepended to the ciphertext.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|_| {
            cache_error(CacheErrorKind::EncryptionFailed, "Failed to encrypt cache entry")
        })?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(combined)
    }

    fn open(&self, combined: &[u8]) -> Result<Vec<u8>, Error> {
        if combined.len() < NONCE_SIZE {
            return Err(cache_error(
                CacheErrorKind::DecryptionFailed,
                "Cache entry is too short",
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
            cache_error(CacheErrorKind::DecryptionFailed, "Failed to decrypt cache entry")
        })
    }
}

#[async_trait]
impl Cache for EncryptedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match self.inner.get(key).await? {
            Some(combined) => Ok(Some(self.open(&combined)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        let sealed = self.seal(&value)?;
        self.inner.set(key, sealed, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.inner.delete(key).await
    }
}

fn parse_key(key_hex: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(key_hex).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: crate::error::ErrorKind::Cache(CacheErrorKind::EncryptionFailed),
    })?;
    if bytes.len() != 32 {
        return Err(cache_error(
            CacheErrorKind::EncryptionFailed,
            "Cache encryption key must be 32 bytes",
        ));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
