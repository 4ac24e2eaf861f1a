//! Reliable transfer — the Reno-style congestion-controlled state
//! machine driving every chunk upload/download (spec §4.3).
//!
//! Like `handshake.rs`, every method returns the messages it wants sent
//! rather than performing I/O itself; the event loop is the only place
//! that touches the transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use swarm_core::connection::{AckOutcome, Connection, DataOutcome, Direction};
use swarm_core::hash::ChunkHash;
use swarm_core::wire::{Message, CHUNK_SIZE};

/// A chunk handed up to the scheduler once a download connection
/// finishes draining.
pub struct CompletedDownload {
    pub chunk_hash: ChunkHash,
    pub data: Vec<u8>,
}

/// An upload/download connection that finished (successfully or not)
/// this tick, for the caller to release handshake admission state.
pub struct FinishedConnection {
    pub peer_addr: SocketAddr,
    pub chunk_hash: ChunkHash,
    pub direction: Direction,
}

pub struct ReliableTransfer {
    download_connections: HashMap<ChunkHash, Connection>,
    upload_connections: HashMap<(SocketAddr, ChunkHash), Connection>,
    fixed_timeout_secs: Option<u64>,
}

impl ReliableTransfer {
    pub fn new(fixed_timeout_secs: Option<u64>) -> Self {
        Self {
            download_connections: HashMap::new(),
            upload_connections: HashMap::new(),
            fixed_timeout_secs,
        }
    }

    pub fn has_download_connection(&self, hash: &ChunkHash) -> bool {
        self.download_connections.contains_key(hash)
    }

    pub fn download_connection_count(&self) -> usize {
        self.download_connections.len()
    }

    /// Read-only view of a download connection's state, keyed by chunk
    /// hash (DATA carries no chunk hash on the wire, but a download
    /// connection is created one-per-hash so the hash alone identifies
    /// it). Used for congestion/loss observability.
    pub fn download_connection(&self, hash: &ChunkHash) -> Option<&Connection> {
        self.download_connections.get(hash)
    }

    /// Read-only view of an upload connection's state, keyed by peer and
    /// chunk hash. Used for congestion/loss observability.
    pub fn upload_connection(&self, peer_addr: SocketAddr, hash: ChunkHash) -> Option<&Connection> {
        self.upload_connections.get(&(peer_addr, hash))
    }

    fn apply_fixed_timeout(&self, conn: &mut Connection) {
        if let Some(secs) = self.fixed_timeout_secs {
            conn.set_fixed_timeout(secs);
        }
    }

    pub fn create_download_connection(&mut self, hash: ChunkHash, peer_addr: SocketAddr, now: Instant) {
        let mut conn = Connection::new(peer_addr, hash, Direction::Download, now);
        self.apply_fixed_timeout(&mut conn);
        conn.state = swarm_core::connection::ConnState::Transfer;
        self.download_connections.insert(hash, conn);
    }

    /// Build an upload connection from local chunk bytes and return the
    /// initial burst of DATA packets to send.
    pub fn create_upload_connection(
        &mut self,
        peer_addr: SocketAddr,
        hash: ChunkHash,
        chunk_data: &[u8],
        now: Instant,
    ) -> Vec<(SocketAddr, Message)> {
        let mut conn = Connection::new(peer_addr, hash, Direction::Upload, now);
        self.apply_fixed_timeout(&mut conn);
        conn.fill_send_buffer(chunk_data);
        let emitted = conn.advance_send_window(now);
        self.upload_connections.insert((peer_addr, hash), conn);
        emitted
            .into_iter()
            .map(|(seq_num, payload)| (peer_addr, Message::Data { seq_num, payload }))
            .collect()
    }

    /// Route an incoming DATA packet to its download connection — found
    /// by peer address alone, since DATA carries no chunk hash on the
    /// wire. Returns the ACK to send and, if the chunk just completed,
    /// its bytes.
    pub fn handle_data_packet(
        &mut self,
        from: SocketAddr,
        seq_num: u32,
        payload: Bytes,
        now: Instant,
    ) -> (Option<(SocketAddr, Message)>, Option<CompletedDownload>) {
        let Some((&hash, conn)) = self
            .download_connections
            .iter_mut()
            .find(|(_, c)| c.peer_addr == from && c.is_active())
        else {
            return (None, None);
        };

        let ack_num = match conn.on_data_received(seq_num, payload, now) {
            DataOutcome::New { ack_num } | DataOutcome::Duplicate { ack_num } => ack_num,
        };
        let ack = (from, Message::Ack { ack_num });

        let completed = if conn.is_chunk_complete(CHUNK_SIZE) {
            conn.state = swarm_core::connection::ConnState::Complete;
            Some(CompletedDownload {
                chunk_hash: hash,
                data: conn.chunk_data().to_vec(),
            })
        } else {
            None
        };

        (Some(ack), completed)
    }

    /// Route an incoming ACK to its upload connection — found by peer
    /// address alone, since ACK carries no chunk hash on the wire.
    /// Returns any further DATA (or a fast retransmit) to send.
    pub fn handle_ack_packet(
        &mut self,
        from: SocketAddr,
        ack_num: u32,
        now: Instant,
    ) -> Vec<(SocketAddr, Message)> {
        let Some(conn) = self
            .upload_connections
            .values_mut()
            .find(|c| c.peer_addr == from && c.is_active())
        else {
            return Vec::new();
        };

        match conn.handle_ack(ack_num, now) {
            AckOutcome::New => {
                let emitted = conn.advance_send_window(now);
                if conn.is_upload_complete() {
                    conn.state = swarm_core::connection::ConnState::Complete;
                }
                emitted
                    .into_iter()
                    .map(|(seq_num, payload)| (from, Message::Data { seq_num, payload }))
                    .collect()
            }
            AckOutcome::Duplicate => {
                if conn.should_fast_retransmit() {
                    conn.update_cwnd_on_loss();
                    conn.retransmission_count += 1;
                    let lost_seq = conn.ack_num + 1;
                    let resend = conn.retransmit_seq(lost_seq, now);
                    conn.duplicate_ack_count = 0;
                    resend
                        .map(|payload| vec![(from, Message::Data { seq_num: lost_seq, payload })])
                        .unwrap_or_default()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Periodic timeout tick over every active connection (spec §4.3.6).
    pub fn handle_timeouts(&mut self, now: Instant) -> Vec<(SocketAddr, Message)> {
        let mut outbox = Vec::new();

        for conn in self.download_connections.values_mut() {
            if conn.is_active() && conn.should_retransmit(now) {
                conn.update_cwnd_on_loss();
                conn.packets_lost += 1;
                outbox.push((
                    conn.peer_addr,
                    Message::Ack {
                        ack_num: conn.ack_num,
                    },
                ));
            }
        }

        for conn in self.upload_connections.values_mut() {
            if conn.is_active() && conn.should_retransmit(now) {
                conn.update_cwnd_on_loss();
                conn.packets_lost += 1;
                let resend_seq = conn.ack_num + 1;
                if let Some(payload) = conn.retransmit_seq(resend_seq, now) {
                    outbox.push((
                        conn.peer_addr,
                        Message::Data {
                            seq_num: resend_seq,
                            payload,
                        },
                    ));
                }
            }
        }

        outbox
    }

    /// Remove connections that reached `Complete`/`Error`, returning
    /// their identity so the handshake admission map can be released.
    pub fn cleanup_finished_connections(&mut self) -> Vec<FinishedConnection> {
        let mut finished = Vec::new();

        self.download_connections.retain(|hash, conn| {
            let done = matches!(
                conn.state,
                swarm_core::connection::ConnState::Complete | swarm_core::connection::ConnState::Error
            );
            if done {
                finished.push(FinishedConnection {
                    peer_addr: conn.peer_addr,
                    chunk_hash: *hash,
                    direction: Direction::Download,
                });
            }
            !done
        });

        self.upload_connections.retain(|(peer_addr, hash), conn| {
            let done = matches!(
                conn.state,
                swarm_core::connection::ConnState::Complete | swarm_core::connection::ConnState::Error
            );
            if done {
                finished.push(FinishedConnection {
                    peer_addr: *peer_addr,
                    chunk_hash: *hash,
                    direction: Direction::Upload,
                });
            }
            !done
        });

        finished
    }
}
