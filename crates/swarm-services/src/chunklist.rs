//! Chunklist parsing — the file named by a `DOWNLOAD` command, each
//! non-blank, non-`#` line `<index> <hex_hash>` (extra fields ignored).

use std::path::Path;

use anyhow::{Context, Result};
use swarm_core::hash::ChunkHash;

pub fn load(path: &Path) -> Result<Vec<ChunkHash>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read chunklist {}", path.display()))?;

    let mut hashes = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let _index = fields.next();
        let Some(hex) = fields.next() else {
            continue;
        };
        let hash: ChunkHash = hex
            .parse()
            .with_context(|| format!("invalid chunk hash in chunklist: {hex}"))?;
        hashes.push(hash);
    }
    Ok(hashes)
}
