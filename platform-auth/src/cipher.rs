//! Symmetric encryption of webhook payloads.
//!
//! Wire format of the plaintext before encryption:
//!
//! ```text
//! random(16) || u32be(len(content)) || content || receiver_identity || padding
//! ```
//!
//! padded to a 32-byte boundary where every pad byte holds the pad length,
//! then encrypted with AES-256-CBC (no library padding) using the decoded
//! key and its first 16 bytes as IV.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{cipher_error, webhook_error, CipherErrorKind, Error, WebhookErrorKind};
use crate::signature::SignatureCodec;
use crate::webhook::de_timestamp;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 32;
const RANDOM_PREFIX_LEN: usize = 16;
const LENGTH_PREFIX_LEN: usize = 4;
const NONCE_LEN: usize = 16;

/// Encrypted message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 ciphertext.
    #[serde(rename = "Encrypt")]
    pub ciphertext: String,
    #[serde(rename = "MsgSignature")]
    pub signature: String,
    #[serde(rename = "TimeStamp", deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    #[serde(rename = "Nonce")]
    pub nonce: String,
}

/// Encrypts outbound and decrypts inbound payloads with an integrity check.
#[derive(Clone)]
pub struct MessageCipher {
    token: String,
    key: [u8; 32],
    receiver_identity: Option<String>,
    codec: SignatureCodec,
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("receiver_identity", &self.receiver_identity)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl MessageCipher {
    /// Create a cipher.
    ///
    /// # Arguments
    ///
    /// * `token` - Shared verification token mixed into every signature
    /// * `aes_key` - Base64 key material (the trailing `=` may be omitted); must decode to 32 bytes
    /// * `receiver_identity` - Identity appended to every plaintext and checked on decrypt
    pub fn new(token: &str, aes_key: &str, receiver_identity: Option<String>) -> Result<Self, Error> {
        Ok(Self {
            token: token.to_string(),
            key: decode_key(aes_key)?,
            receiver_identity: receiver_identity.filter(|identity| !identity.is_empty()),
            codec: SignatureCodec::default(),
        })
    }

    /// Use a different signature codec.
    pub fn with_codec(mut self, codec: SignatureCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Signature over the token, timestamp, nonce and ciphertext.
    pub fn signature(&self, timestamp: &str, nonce: &str, ciphertext: &str) -> String {
        self.codec.sign(&[self.token.as_str(), timestamp, nonce, ciphertext])
    }

    /// Encrypt `plaintext` into a signed envelope.
    ///
    /// A random nonce and the current time are used when not supplied.
    pub fn encrypt(
        &self,
        plaintext: &str,
        nonce: Option<&str>,
        timestamp: Option<i64>,
    ) -> Result<EncryptedEnvelope, Error> {
        let content_len = u32::try_from(plaintext.len()).map_err(|_| {
            cipher_error(CipherErrorKind::EncryptionFailed, "Plaintext is too large")
        })?;

        let prefix: [u8; RANDOM_PREFIX_LEN] = rand::thread_rng().gen();
        let mut buffer = Vec::with_capacity(plaintext.len() + 2 * BLOCK_SIZE);
        buffer.extend_from_slice(&prefix);
        buffer.extend_from_slice(&content_len.to_be_bytes());
        buffer.extend_from_slice(plaintext.as_bytes());
        if let Some(identity) = &self.receiver_identity {
            buffer.extend_from_slice(identity.as_bytes());
        }
        pad(&mut buffer);

        let len = buffer.len();
        let encryptor = Aes256CbcEnc::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| cipher_error(CipherErrorKind::InvalidKey, "Invalid AES key length"))?;
        encryptor
            .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
            .map_err(|_| cipher_error(CipherErrorKind::EncryptionFailed, "AES encryption failed"))?;

        let ciphertext = BASE64.encode(&buffer);
        let nonce = nonce
            .filter(|nonce| !nonce.is_empty())
            .map(str::to_string)
            .unwrap_or_else(random_nonce);
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());
        let signature = self.signature(&timestamp.to_string(), &nonce, &ciphertext);

        Ok(EncryptedEnvelope {
            ciphertext,
            signature,
            timestamp,
            nonce,
        })
    }

    /// Verify and decrypt an inbound payload.
    ///
    /// The signature is checked before the ciphertext is decoded; a mismatch
    /// fails with `WebhookErrorKind::InvalidSignature` without touching the
    /// cipher.
    pub fn decrypt(
        &self,
        ciphertext: &str,
        signature: &str,
        nonce: &str,
        timestamp: &str,
    ) -> Result<String, Error> {
        if !self
            .codec
            .verify(&[self.token.as_str(), timestamp, nonce, ciphertext], signature)
        {
            debug!("Rejected webhook payload with invalid signature");
            return Err(webhook_error(
                WebhookErrorKind::InvalidSignature,
                "Invalid Signature.",
            ));
        }

        let mut buffer = BASE64.decode(ciphertext).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Cipher(CipherErrorKind::DecryptionFailed),
        })?;

        let decryptor = Aes256CbcDec::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| cipher_error(CipherErrorKind::InvalidKey, "Invalid AES key length"))?;
        let decrypted_len = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| cipher_error(CipherErrorKind::DecryptionFailed, "AES decryption failed"))?
            .len();
        buffer.truncate(decrypted_len);

        let plaintext = unpad(&buffer)?;
        let body = plaintext.get(RANDOM_PREFIX_LEN..).ok_or_else(illegal_buffer)?;
        let length_bytes: [u8; LENGTH_PREFIX_LEN] = body
            .get(..LENGTH_PREFIX_LEN)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(illegal_buffer)?;
        let content_len = u32::from_be_bytes(length_bytes) as usize;
        let content_end = LENGTH_PREFIX_LEN
            .checked_add(content_len)
            .filter(|end| *end <= body.len())
            .ok_or_else(illegal_buffer)?;

        if let Some(expected) = &self.receiver_identity {
            let trailing = String::from_utf8_lossy(&body[content_end..]);
            if trailing.trim() != expected {
                debug!("Rejected webhook payload for another receiver");
                return Err(webhook_error(
                    WebhookErrorKind::IdentityMismatch,
                    "Invalid receiver identity.",
                ));
            }
        }

        String::from_utf8(body[LENGTH_PREFIX_LEN..content_end].to_vec()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Cipher(CipherErrorKind::DecryptionFailed),
        })
    }

    /// Decrypt an envelope produced by [`MessageCipher::encrypt`].
    pub fn decrypt_envelope(&self, envelope: &EncryptedEnvelope) -> Result<String, Error> {
        self.decrypt(
            &envelope.ciphertext,
            &envelope.signature,
            &envelope.nonce,
            &envelope.timestamp.to_string(),
        )
    }
}

/// Random alphanumeric nonce.
pub fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn decode_key(aes_key: &str) -> Result<[u8; 32], Error> {
    let mut material = aes_key.trim().to_string();
    while material.len() % 4 != 0 {
        material.push('=');
    }

    let bytes = BASE64.decode(material.as_bytes()).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: crate::error::ErrorKind::Cipher(CipherErrorKind::InvalidKey),
    })?;

    bytes
        .try_into()
        .map_err(|_| cipher_error(CipherErrorKind::InvalidKey, "AES key must decode to 32 bytes"))
}

fn pad(buffer: &mut Vec<u8>) {
    let pad_len = BLOCK_SIZE - buffer.len() % BLOCK_SIZE;
    buffer.resize(buffer.len() + pad_len, pad_len as u8);
}

fn unpad(buffer: &[u8]) -> Result<&[u8], Error> {
    let pad_len = *buffer.last().ok_or_else(illegal_buffer)? as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > buffer.len() {
        return Err(illegal_buffer());
    }
    Ok(&buffer[..buffer.len() - pad_len])
}

fn illegal_buffer() -> Error {
    cipher_error(CipherErrorKind::DecryptionFailed, "Illegal buffer")
}
