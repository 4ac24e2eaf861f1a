//! Chunk identifiers — SHA-1 digests, 20 bytes raw on the wire, lowercase
//! hex internally wherever a digest is used as a map key.

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};

/// Width of a chunk identifier, in bytes (SHA-1 output size).
pub const HASH_LEN: usize = 20;

/// A chunk identifier: the SHA-1 digest of the chunk's content.
///
/// `Display`/`FromStr` give the lowercase hex form used as a `HashMap` key
/// everywhere outside the wire codec; the raw 20 bytes are only needed on
/// the wire and in `Sha1::digest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash([u8; HASH_LEN]);

impl ChunkHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// SHA-1 of `content`, e.g. for `sha1("abc")` in the trivial-download
    /// test scenario.
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha1::digest(content);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashParseError {
    #[error("chunk hash must be {HASH_LEN} bytes hex-encoded: {0}")]
    BadLength(String),
    #[error("invalid hex in chunk hash: {0}")]
    BadHex(#[from] hex::FromHexError),
}

impl FromStr for ChunkHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.trim().to_ascii_lowercase();
        let decoded = hex::decode(&clean)?;
        if decoded.len() != HASH_LEN {
            return Err(HashParseError::BadLength(clean));
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}
