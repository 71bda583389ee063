//! Content digests.
//!
//! A [`DescriptorDigest`] is a validated `sha256:<64 lowercase hex>` value.
//! Equality and hashing only look at the hex hash, so digests can be used as
//! map keys and as directory names inside the cache.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{KeelError, Result};

/// Algorithm prefix of every digest keel produces or accepts.
pub const SHA256_ALGORITHM: &str = "sha256";

/// Length of a SHA-256 hash in hex characters.
pub const HASH_LENGTH: usize = 64;

/// A validated SHA-256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorDigest {
    hash: String,
}

impl DescriptorDigest {
    /// Create a digest from a bare 64-character hex hash.
    pub fn from_hash(hash: &str) -> Result<Self> {
        if !is_valid_hash(hash) {
            return Err(KeelError::InvalidDigest(format!(
                "'{}' is not a valid SHA-256 hash",
                hash
            )));
        }
        Ok(Self {
            hash: hash.to_string(),
        })
    }

    /// Create a digest from its `sha256:<hash>` form.
    pub fn from_digest(digest: &str) -> Result<Self> {
        let hash = digest
            .strip_prefix(SHA256_ALGORITHM)
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|hash| is_valid_hash(hash))
            .ok_or_else(|| {
                KeelError::InvalidDigest(format!(
                    "'{}' is not a valid digest (expected sha256:<64 hex characters>)",
                    digest
                ))
            })?;
        Ok(Self {
            hash: hash.to_string(),
        })
    }

    /// Digest of an in-memory byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Finish a running SHA-256 computation.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self {
            hash: hex::encode(hasher.finalize()),
        }
    }

    /// The 64 hex characters, without the algorithm prefix.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LENGTH
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl fmt::Display for DescriptorDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", SHA256_ALGORITHM, self.hash)
    }
}

impl FromStr for DescriptorDigest {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_digest(s)
    }
}

impl Serialize for DescriptorDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DescriptorDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_digest(&s).map_err(serde::de::Error::custom)
    }
}

/// Digest and size of a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobDescriptor {
    /// Number of bytes
    pub size: u64,
    /// SHA-256 of the bytes
    pub digest: DescriptorDigest,
}

impl BlobDescriptor {
    pub fn new(size: u64, digest: DescriptorDigest) -> Self {
        Self { size, digest }
    }
}
