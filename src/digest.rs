//! Content digests for pinned resources.
//!
//! A pin is the full SHA-256 of the artifact, written as 64 hex characters in
//! the descriptor. Parsing fails closed: an empty, truncated, or non-hex pin
//! is rejected before anything is fetched.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest is empty")]
    Empty,
    #[error("digest has {0} hex characters, expected {expected}", expected = DIGEST_LEN * 2)]
    BadLength(usize),
    #[error("digest is not valid hex: {0}")]
    BadHex(String),
}

/// A pinned SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Digest([u8; DIGEST_LEN]);

impl Sha256Digest {
    /// Compute the digest of a byte payload.
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Sha256Digest(hasher.finalize().into())
    }

    /// Whether `bytes` hash to this pin.
    ///
    /// The comparison folds over all 32 bytes without short-circuiting, so
    /// its shape does not depend on where a mismatch occurs.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        let actual = Self::compute(bytes);
        let mut diff = 0u8;
        for (a, b) in self.0.iter().zip(actual.0.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl FromStr for Sha256Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DigestError::Empty);
        }
        if s.len() != DIGEST_LEN * 2 {
            return Err(DigestError::BadLength(s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| DigestError::BadHex(e.to_string()))?;
        let mut pin = [0u8; DIGEST_LEN];
        pin.copy_from_slice(&bytes);
        Ok(Sha256Digest(pin))
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self)
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
