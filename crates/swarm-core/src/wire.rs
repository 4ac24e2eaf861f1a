//! Swarm wire format — the six message types exchanged over the datagram
//! transport.
//!
//! These types ARE the protocol. Every field, every size is part of the
//! wire format; interop requires byte-for-byte compatibility with the
//! 12-byte header below. There is no unsafe code in this module: fields
//! are plain `u8`/`u16`/`u32` read and written big-endian by hand, since
//! the header is tiny and not a packed/aligned struct worth a zero-copy
//! derive.

use bytes::Bytes;

use crate::hash::{ChunkHash, HASH_LEN};

/// Header size in bytes: type (1) + header_len (1) + pkt_len (2) +
/// seq_num (4) + ack_num (4).
pub const HEADER_LEN: usize = 12;

/// Maximum datagram size, header included.
pub const MAX_DATAGRAM: usize = 1400;

/// Maximum DATA payload: `MAX_DATAGRAM - HEADER_LEN`.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

/// Logical size of a chunk, uncompressed, before the final short segment.
pub const CHUNK_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MsgType {
    WhoHas = 0,
    IHave = 1,
    Get = 2,
    Data = 3,
    Ack = 4,
    Denied = 5,
}

impl MsgType {
    fn from_u8(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(Self::WhoHas),
            1 => Ok(Self::IHave),
            2 => Ok(Self::Get),
            3 => Ok(Self::Data),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Denied),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// A parsed or to-be-encoded wire message. Each variant carries exactly
/// the payload spec §4.1 assigns to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Query peers for chunks. Must carry at least one hash.
    WhoHas(Vec<ChunkHash>),
    /// Announce which of a prior WHOHAS's hashes we hold. At least one.
    IHave(Vec<ChunkHash>),
    /// Request a single chunk.
    Get(ChunkHash),
    /// One segment of chunk payload.
    Data { seq_num: u32, payload: Bytes },
    /// Cumulative acknowledgment.
    Ack { ack_num: u32 },
    /// Refusal: upload slots exhausted, or no requested chunk held.
    Denied,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram shorter than header: {0} < {HEADER_LEN}")]
    Truncated(usize),
    #[error("declared pkt_len {declared} does not match actual length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("malformed payload for message type")]
    BadPayload,
    #[error("payload too large for a single datagram: {0} > {MAX_PAYLOAD}")]
    BadLength(usize),
    #[error("unknown message type {0}")]
    UnknownType(u8),
}

fn hash_list_payload(hashes: &[ChunkHash]) -> Result<Vec<u8>, WireError> {
    if hashes.is_empty() {
        return Err(WireError::BadPayload);
    }
    let mut payload = Vec::with_capacity(hashes.len() * HASH_LEN);
    for h in hashes {
        payload.extend_from_slice(h.as_bytes());
    }
    Ok(payload)
}

fn parse_hash_list(payload: &[u8]) -> Result<Vec<ChunkHash>, WireError> {
    if payload.is_empty() || payload.len() % HASH_LEN != 0 {
        return Err(WireError::BadPayload);
    }
    Ok(payload
        .chunks_exact(HASH_LEN)
        .map(|c| {
            let mut bytes = [0u8; HASH_LEN];
            bytes.copy_from_slice(c);
            ChunkHash::from_bytes(bytes)
        })
        .collect())
}

fn write_header(buf: &mut Vec<u8>, ty: MsgType, pkt_len: u16, seq_num: u32, ack_num: u32) {
    buf.push(ty as u8);
    buf.push(HEADER_LEN as u8);
    buf.extend_from_slice(&pkt_len.to_be_bytes());
    buf.extend_from_slice(&seq_num.to_be_bytes());
    buf.extend_from_slice(&ack_num.to_be_bytes());
}

/// Encode a message into a single datagram.
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    match msg {
        Message::WhoHas(hashes) => {
            let payload = hash_list_payload(hashes)?;
            let pkt_len = HEADER_LEN + payload.len();
            let mut buf = Vec::with_capacity(pkt_len);
            write_header(&mut buf, MsgType::WhoHas, pkt_len as u16, 0, 0);
            buf.extend_from_slice(&payload);
            Ok(buf)
        }
        Message::IHave(hashes) => {
            let payload = hash_list_payload(hashes)?;
            let pkt_len = HEADER_LEN + payload.len();
            let mut buf = Vec::with_capacity(pkt_len);
            write_header(&mut buf, MsgType::IHave, pkt_len as u16, 0, 0);
            buf.extend_from_slice(&payload);
            Ok(buf)
        }
        Message::Get(hash) => {
            let pkt_len = HEADER_LEN + HASH_LEN;
            let mut buf = Vec::with_capacity(pkt_len);
            write_header(&mut buf, MsgType::Get, pkt_len as u16, 0, 0);
            buf.extend_from_slice(hash.as_bytes());
            Ok(buf)
        }
        Message::Data { seq_num, payload } => {
            if payload.len() > MAX_PAYLOAD {
                return Err(WireError::BadLength(payload.len()));
            }
            let pkt_len = HEADER_LEN + payload.len();
            let mut buf = Vec::with_capacity(pkt_len);
            write_header(&mut buf, MsgType::Data, pkt_len as u16, *seq_num, 0);
            buf.extend_from_slice(payload);
            Ok(buf)
        }
        Message::Ack { ack_num } => {
            let mut buf = Vec::with_capacity(HEADER_LEN);
            write_header(&mut buf, MsgType::Ack, HEADER_LEN as u16, 0, *ack_num);
            Ok(buf)
        }
        Message::Denied => {
            let mut buf = Vec::with_capacity(HEADER_LEN);
            write_header(&mut buf, MsgType::Denied, HEADER_LEN as u16, 0, 0);
            Ok(buf)
        }
    }
}

/// Decode a single datagram into a message.
pub fn decode(datagram: &[u8]) -> Result<Message, WireError> {
    if datagram.len() < HEADER_LEN {
        return Err(WireError::Truncated(datagram.len()));
    }

    let ty = MsgType::from_u8(datagram[0])?;
    let header_len = datagram[1] as usize;
    let pkt_len = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    let seq_num = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
    let ack_num = u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]);

    if pkt_len != datagram.len() {
        return Err(WireError::LengthMismatch {
            declared: pkt_len,
            actual: datagram.len(),
        });
    }

    let payload = if header_len < datagram.len() {
        &datagram[header_len..]
    } else {
        &[][..]
    };

    match ty {
        MsgType::WhoHas => Ok(Message::WhoHas(parse_hash_list(payload)?)),
        MsgType::IHave => Ok(Message::IHave(parse_hash_list(payload)?)),
        MsgType::Get => {
            if payload.len() != HASH_LEN {
                return Err(WireError::BadPayload);
            }
            let mut bytes = [0u8; HASH_LEN];
            bytes.copy_from_slice(payload);
            Ok(Message::Get(ChunkHash::from_bytes(bytes)))
        }
        MsgType::Data => Ok(Message::Data {
            seq_num,
            payload: Bytes::copy_from_slice(payload),
        }),
        MsgType::Ack => Ok(Message::Ack { ack_num }),
        MsgType::Denied => Ok(Message::Denied),
    }
}
