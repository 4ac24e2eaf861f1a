//! Per-transfer connection state: buffers, sequence/ack numbers, congestion
//! window, RTT estimator, retransmit timer.
//!
//! Pure state machine, no I/O: callers (the daemon's transfer manager) turn
//! the `Vec<(seq, payload)>`/`DataOutcome`/`AckOutcome` results into actual
//! socket sends. This separation mirrors the teacher's preference for
//! keeping protocol state free of the daemon's async I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::hash::ChunkHash;
use crate::wire::MAX_PAYLOAD;

/// Jacobson/Karn RTT smoothing factor.
const ALPHA: f64 = 0.15;
/// Jacobson/Karn deviation smoothing factor.
const BETA: f64 = 0.30;

const INITIAL_ESTIMATED_RTT: f64 = 1.0;
const INITIAL_DEV_RTT: f64 = 0.5;
/// `estimated_rtt + 4 * dev_rtt` at the initial values above.
const INITIAL_TIMEOUT: f64 = INITIAL_ESTIMATED_RTT + 4.0 * INITIAL_DEV_RTT;

/// Initial slow-start threshold, in packets.
const INITIAL_SSTHRESH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Handshake,
    Transfer,
    Complete,
    Error,
}

/// Outcome of processing an incoming DATA packet on a download connection.
/// Either way the caller sends one ACK carrying `ack_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    New { ack_num: u32 },
    Duplicate { ack_num: u32 },
}

/// Outcome of processing an incoming ACK on an upload connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    New,
    Duplicate,
}

/// Number of MAX_PAYLOAD-sized packets needed to carry `len` bytes.
pub fn packets_for_len(len: usize) -> u32 {
    ((len + MAX_PAYLOAD - 1) / MAX_PAYLOAD).max(1) as u32
}

/// A single upload or download transfer for one chunk with one peer.
pub struct Connection {
    pub peer_addr: SocketAddr,
    pub chunk_hash: ChunkHash,
    pub direction: Direction,
    pub state: ConnState,

    pub seq_num: u32,
    pub ack_num: u32,

    /// Ordered `(seq, payload)` pairs awaiting ack, upload only. Entries
    /// with `seq <= ack_num` are pruned on every new ack, matching the
    /// original implementation; retransmission looks up a sequence number
    /// by linear scan of this buffer rather than direct indexing (see
    /// the module-level note on the source's ambiguous retransmit path).
    send_buffer: Vec<(u32, Bytes)>,
    /// Total packet count for this upload (`N` in spec terms). Unset (0)
    /// for downloads, where the final size isn't known up front.
    total_packets: u32,

    /// Sparse out-of-order buffer, download only.
    recv_buffer: HashMap<u32, Bytes>,
    /// Contiguous bytes delivered so far, download only.
    chunk_data: Vec<u8>,

    pub cwnd: f64,
    pub ssthresh: u32,

    pub estimated_rtt: f64,
    pub dev_rtt: f64,
    pub timeout_interval: f64,
    /// If set (via `-t`), overrides the RTT estimator for this connection.
    fixed_timeout: Option<f64>,

    /// Per-packet send timestamps, upload only, for Karn's-rule RTT
    /// sampling: populated on fresh sends, removed on ack or retransmit.
    packet_times: HashMap<u32, Instant>,
    /// First-DATA timestamp, download only, used for the single RTT sample
    /// the receiving side takes (spec §4.3.2).
    first_packet_time: Option<Instant>,

    pub last_send_time: Option<Instant>,
    pub last_ack_time: Option<Instant>,
    pub duplicate_ack_count: u32,
    pub retransmission_count: u32,

    pub packets_sent: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
    pub bytes_transferred: u64,

    pub created_at: Instant,
}

impl Connection {
    pub fn new(peer_addr: SocketAddr, chunk_hash: ChunkHash, direction: Direction, now: Instant) -> Self {
        Self {
            peer_addr,
            chunk_hash,
            direction,
            state: ConnState::Idle,
            seq_num: 0,
            ack_num: 0,
            send_buffer: Vec::new(),
            total_packets: 0,
            recv_buffer: HashMap::new(),
            chunk_data: Vec::new(),
            cwnd: 1.0,
            ssthresh: INITIAL_SSTHRESH,
            estimated_rtt: INITIAL_ESTIMATED_RTT,
            dev_rtt: INITIAL_DEV_RTT,
            timeout_interval: INITIAL_TIMEOUT,
            fixed_timeout: None,
            packet_times: HashMap::new(),
            first_packet_time: None,
            last_send_time: None,
            last_ack_time: None,
            duplicate_ack_count: 0,
            retransmission_count: 0,
            packets_sent: 0,
            packets_acked: 0,
            packets_lost: 0,
            bytes_transferred: 0,
            created_at: now,
        }
    }

    /// Apply a `-t` fixed timeout, overriding the RTT estimator.
    pub fn set_fixed_timeout(&mut self, secs: u64) {
        self.fixed_timeout = Some(secs as f64);
        self.timeout_interval = secs as f64;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnState::Handshake | ConnState::Transfer)
    }

    pub fn is_upload(&self) -> bool {
        matches!(self.direction, Direction::Upload)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }

    /// Split `chunk` into `MAX_PAYLOAD`-sized packets numbered from 1 and
    /// move to `Transfer`. Upload only.
    pub fn fill_send_buffer(&mut self, chunk: &[u8]) {
        self.total_packets = packets_for_len(chunk.len());
        self.send_buffer = chunk
            .chunks(MAX_PAYLOAD)
            .enumerate()
            .map(|(i, seg)| ((i + 1) as u32, Bytes::copy_from_slice(seg)))
            .collect();
        self.state = ConnState::Transfer;
    }

    /// Emit DATA packets while `seq_num < min(N, ack_num + window)`,
    /// stamping send time and recording a fresh-send timestamp for RTT
    /// sampling (spec §4.3.4).
    pub fn advance_send_window(&mut self, now: Instant) -> Vec<(u32, Bytes)> {
        let mut emitted = Vec::new();
        let window = self.get_send_window();
        let ceiling = self.total_packets.min(self.ack_num + window);
        while self.seq_num < ceiling {
            let next_seq = self.seq_num + 1;
            let Some(data) = self
                .send_buffer
                .iter()
                .find(|(s, _)| *s == next_seq)
                .map(|(_, d)| d.clone())
            else {
                break;
            };
            self.seq_num = next_seq;
            self.last_send_time = Some(now);
            self.packets_sent += 1;
            self.packet_times.insert(next_seq, now);
            emitted.push((next_seq, data));
        }
        emitted
    }

    pub fn get_send_window(&self) -> u32 {
        (self.cwnd.floor() as u32).max(1)
    }

    /// Packets currently in flight (upload only).
    pub fn in_flight(&self) -> u32 {
        self.seq_num.saturating_sub(self.ack_num)
    }

    pub fn can_send_more(&self) -> bool {
        self.is_upload() && self.in_flight() < self.get_send_window()
    }

    /// Process an incoming cumulative ACK. Returns whether it was new.
    pub fn handle_ack(&mut self, ack_num: u32, now: Instant) -> AckOutcome {
        if ack_num > self.ack_num {
            self.ack_num = ack_num;
            self.duplicate_ack_count = 0;
            self.last_ack_time = Some(now);
            self.send_buffer.retain(|(s, _)| *s > ack_num);

            if let Some(sent_at) = self.packet_times.remove(&ack_num) {
                let sample = now.duration_since(sent_at).as_secs_f64();
                self.update_timeout_on_sample(sample);
            }

            self.update_cwnd_on_ack();
            self.packets_acked += 1;
            AckOutcome::New
        } else {
            self.duplicate_ack_count += 1;
            AckOutcome::Duplicate
        }
    }

    pub fn should_fast_retransmit(&self) -> bool {
        self.duplicate_ack_count >= 3
    }

    /// Look up the payload for `seq` by linear scan of `send_buffer` (the
    /// scan-by-seq retransmit semantics the source actually executes; see
    /// the spec's own open question on this ambiguity). Removes any
    /// pending RTT-sample timestamp for `seq` per Karn's rule and stamps
    /// `last_send_time`.
    pub fn retransmit_seq(&mut self, seq: u32, now: Instant) -> Option<Bytes> {
        let data = self
            .send_buffer
            .iter()
            .find(|(s, _)| *s == seq)
            .map(|(_, d)| d.clone())?;
        self.packet_times.remove(&seq);
        self.last_send_time = Some(now);
        Some(data)
    }

    pub fn update_cwnd_on_ack(&mut self) {
        if self.cwnd < self.ssthresh as f64 {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    pub fn update_cwnd_on_loss(&mut self) {
        self.ssthresh = ((self.cwnd / 2.0).floor() as u32).max(2);
        self.cwnd = 1.0;
    }

    fn update_timeout_on_sample(&mut self, sample_rtt: f64) {
        if self.fixed_timeout.is_some() {
            return;
        }
        self.estimated_rtt = (1.0 - ALPHA) * self.estimated_rtt + ALPHA * sample_rtt;
        self.dev_rtt = (1.0 - BETA) * self.dev_rtt + BETA * (sample_rtt - self.estimated_rtt).abs();
        self.timeout_interval = self.estimated_rtt + 4.0 * self.dev_rtt;
    }

    /// Has `timeout_interval` elapsed since the last send? A connection
    /// that has never sent (true of every download connection, which
    /// never stamps `last_send_time`) is always considered timed out —
    /// matching the source's unconditional timeout tick for downloads.
    pub fn should_retransmit(&self, now: Instant) -> bool {
        match self.last_send_time {
            None => true,
            Some(t) => now.duration_since(t).as_secs_f64() > self.timeout_interval,
        }
    }

    /// Record a received DATA packet (download only). Drains any
    /// contiguously-buffered successors into `chunk_data` and takes the
    /// receiver-side RTT sample on the first DATA packet ever seen.
    pub fn on_data_received(&mut self, seq_num: u32, payload: Bytes, now: Instant) -> DataOutcome {
        if seq_num <= self.ack_num || self.recv_buffer.contains_key(&seq_num) {
            return DataOutcome::Duplicate {
                ack_num: self.ack_num,
            };
        }

        self.bytes_transferred += payload.len() as u64;
        self.recv_buffer.insert(seq_num, payload);

        match self.first_packet_time {
            None => self.first_packet_time = Some(now),
            Some(first) => {
                let sample = now.duration_since(first).as_secs_f64();
                self.update_timeout_on_sample(sample);
            }
        }

        while let Some(data) = self.recv_buffer.remove(&(self.ack_num + 1)) {
            self.chunk_data.extend_from_slice(&data);
            self.ack_num += 1;
        }

        DataOutcome::New {
            ack_num: self.ack_num,
        }
    }

    pub fn is_chunk_complete(&self, expected_size: usize) -> bool {
        matches!(self.direction, Direction::Download) && self.chunk_data.len() >= expected_size
    }

    /// Upload completes when every packet has been acked.
    pub fn is_upload_complete(&self) -> bool {
        self.is_upload() && self.total_packets > 0 && self.ack_num >= self.total_packets
    }

    pub fn chunk_data(&self) -> &[u8] {
        &self.chunk_data
    }
}
