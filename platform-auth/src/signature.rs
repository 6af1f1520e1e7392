//! Canonical signing shared by webhook authentication and ticket signing.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One-way digest applied to the canonical string.
///
/// The platform signs with SHA-1. `Sha256` only interoperates with peers
/// configured the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    fn hex_digest(&self, input: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha1 => hex::encode(Sha1::digest(input)),
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input)),
        }
    }
}

/// Deterministic signer for sets of string parts.
///
/// Parts are sorted byte-wise and concatenated without separators before
/// hashing, so callers may pass them in any order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureCodec {
    algorithm: DigestAlgorithm,
}

impl SignatureCodec {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Sign an unordered list of parts.
    ///
    /// # Returns
    ///
    /// Lowercase hex digest of the sorted, concatenated parts.
    pub fn sign<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let mut sorted: Vec<&str> = parts.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        self.algorithm.hex_digest(sorted.concat().as_bytes())
    }

    /// Check `expected` against the signature of `parts` in constant time.
    pub fn verify<S: AsRef<str>>(&self, parts: &[S], expected: &str) -> bool {
        let actual = self.sign(parts);
        actual.as_bytes().ct_eq(expected.as_bytes()).into()
    }

    /// Sign named fields as a canonical query string (`k=v` sorted by key, joined by `&`).
    ///
    /// Used for front-end ticket signatures, where the field names are part of
    /// the signed text.
    pub fn sign_fields(&self, fields: &[(&str, &str)]) -> String {
        let mut sorted = fields.to_vec();
        sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let canonical = sorted
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");

        self.algorithm.hex_digest(canonical.as_bytes())
    }
}
