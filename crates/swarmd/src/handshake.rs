//! WHOHAS/IHAVE/GET discovery handshake (spec §4.2).
//!
//! Every method here is pure state transition plus an "outbox" of
//! `(peer, message)` pairs for the caller to actually put on the wire —
//! keeps admission logic and broadcast fan-out unit-testable without a
//! socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use swarm_core::hash::ChunkHash;
use swarm_core::wire::Message;
use swarm_services::chunk_store::ChunkMap;
use swarm_services::roster::{self, RosterEntry};

/// How long an outstanding WHOHAS is tracked before being dropped.
const WHOHAS_TIMEOUT: Duration = Duration::from_secs(30);

struct ActiveRequest {
    requested_at: Instant,
    /// Peers known to hold this hash, in order of first response.
    candidates: Vec<SocketAddr>,
}

pub struct HandshakeManager {
    self_id: u32,
    roster: Vec<RosterEntry>,
    max_conn: usize,
    active_requests: HashMap<ChunkHash, ActiveRequest>,
    /// Mirrors (but does not replace) the reliable-transfer layer's own
    /// upload connection map — kept here purely for admission counting,
    /// same separation the source implementation uses between its
    /// handshake and transfer managers.
    upload_slots: std::collections::HashSet<(SocketAddr, ChunkHash)>,
}

impl HandshakeManager {
    pub fn new(self_id: u32, roster: Vec<RosterEntry>, max_conn: usize) -> Self {
        Self {
            self_id,
            roster,
            max_conn,
            active_requests: HashMap::new(),
            upload_slots: std::collections::HashSet::new(),
        }
    }

    /// Broadcast one WHOHAS datagram enumerating `hashes` to every peer
    /// but ourselves. Empty `hashes` sends nothing.
    pub fn broadcast_whohas(&mut self, hashes: Vec<ChunkHash>, now: Instant) -> Vec<(SocketAddr, Message)> {
        if hashes.is_empty() {
            return Vec::new();
        }
        let msg = Message::WhoHas(hashes.clone());
        let outbox = roster::peers_excluding(&self.roster, self.self_id)
            .map(|p| (p.addr, msg.clone()))
            .collect();

        for hash in hashes {
            self.active_requests.entry(hash).or_insert_with(|| ActiveRequest {
                requested_at: now,
                candidates: Vec::new(),
            });
        }
        outbox
    }

    /// Reply to an incoming WHOHAS: DENIED if we're out of upload slots
    /// or hold none of the requested hashes, otherwise IHAVE the
    /// intersection.
    pub fn handle_whohas(
        &self,
        requested: &[ChunkHash],
        chunk_store: &ChunkMap,
        from: SocketAddr,
    ) -> (SocketAddr, Message) {
        if self.upload_slots.len() >= self.max_conn {
            return (from, Message::Denied);
        }
        let available: Vec<ChunkHash> = requested
            .iter()
            .copied()
            .filter(|h| chunk_store.contains_key(&h.to_hex()))
            .collect();
        if available.is_empty() {
            (from, Message::Denied)
        } else {
            (from, Message::IHave(available))
        }
    }

    /// Record `from` as a candidate supplier for every hash we're still
    /// tracking a WHOHAS for. Returns the usable subset for the
    /// scheduler to act on.
    pub fn handle_ihave(&mut self, hashes: &[ChunkHash], from: SocketAddr) -> Vec<ChunkHash> {
        let mut usable = Vec::new();
        for hash in hashes {
            if let Some(req) = self.active_requests.get_mut(hash) {
                if !req.candidates.contains(&from) {
                    req.candidates.push(from);
                }
                usable.push(*hash);
            }
        }
        usable
    }

    pub fn handle_denied(&self, from: SocketAddr) {
        tracing::debug!(%from, "peer denied our request");
    }

    pub fn send_get(&self, hash: ChunkHash, peer: SocketAddr) -> (SocketAddr, Message) {
        (peer, Message::Get(hash))
    }

    /// Admit or silently reject an incoming GET. On admission, reserves
    /// the upload slot and returns the hash for the caller to start an
    /// upload connection.
    pub fn handle_get(&mut self, hash: ChunkHash, from: SocketAddr, chunk_store: &ChunkMap) -> Option<ChunkHash> {
        if !chunk_store.contains_key(&hash.to_hex()) {
            return None;
        }
        if self.upload_slots.contains(&(from, hash)) {
            return None;
        }
        if self.upload_slots.len() >= self.max_conn {
            return None;
        }
        self.upload_slots.insert((from, hash));
        Some(hash)
    }

    pub fn release_upload_slot(&mut self, peer: SocketAddr, hash: ChunkHash) {
        self.upload_slots.remove(&(peer, hash));
    }

    pub fn available_upload_slots(&self) -> usize {
        self.max_conn.saturating_sub(self.upload_slots.len())
    }

    pub fn get_download_candidates(&self, hash: &ChunkHash) -> &[SocketAddr] {
        self.active_requests
            .get(hash)
            .map(|r| r.candidates.as_slice())
            .unwrap_or(&[])
    }

    pub fn cleanup_old_requests(&mut self, now: Instant) {
        self.active_requests.retain(|hash, req| {
            let alive = now.duration_since(req.requested_at) <= WHOHAS_TIMEOUT;
            if !alive {
                tracing::debug!(hash = %hash, "WHOHAS request timed out");
            }
            alive
        });
    }
}
