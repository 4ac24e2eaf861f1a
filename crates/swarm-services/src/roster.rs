//! The static peer roster — `<id> <ip> <port>` lines loaded once at
//! startup (spec §6). Peer identity is the index into this list.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: u32,
    pub addr: SocketAddr,
}

pub fn load(path: &Path) -> Result<Vec<RosterEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read roster {}", path.display()))?;

    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(id), Some(ip), Some(port)) = (fields.next(), fields.next(), fields.next())
        else {
            bail!("roster line {} malformed: {:?}", lineno + 1, line);
        };
        let id: u32 = id
            .parse()
            .with_context(|| format!("roster line {} has non-numeric id", lineno + 1))?;
        let ip: IpAddr = ip
            .parse()
            .with_context(|| format!("roster line {} has invalid ip", lineno + 1))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("roster line {} has invalid port", lineno + 1))?;
        entries.push(RosterEntry {
            id,
            addr: SocketAddr::new(ip, port),
        });
    }
    Ok(entries)
}

/// Every roster entry except `self_id`, the addressees of a broadcast.
pub fn peers_excluding<'a>(
    roster: &'a [RosterEntry],
    self_id: u32,
) -> impl Iterator<Item = &'a RosterEntry> {
    roster.iter().filter(move |p| p.id != self_id)
}
