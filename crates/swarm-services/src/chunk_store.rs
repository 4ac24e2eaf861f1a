//! The local chunk store — a persisted `hex_hash -> bytes` mapping.
//!
//! Loaded once at startup and treated as read-only by the transfer path
//! (spec: "local chunk store is read-only to the transfer path"). The
//! download-output blob uses the same on-disk format so a completed
//! download can be inspected with the same loader.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// `hex_hash -> bytes`. Bincode-encoded on disk; this is the one place
/// both the chunk store and a finished download's output blob agree on.
pub type ChunkMap = HashMap<String, Vec<u8>>;

pub fn load(path: &Path) -> Result<ChunkMap> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read chunk store {}", path.display()))?;
    bincode::deserialize(&bytes)
        .with_context(|| format!("failed to decode chunk store {}", path.display()))
}

pub fn save(path: &Path, chunks: &ChunkMap) -> Result<()> {
    let bytes = bincode::serialize(chunks).context("failed to encode chunk map")?;
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write chunk store {}", path.display()))
}
