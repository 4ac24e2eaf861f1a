//! Pure protocol types and state machines shared by the daemon and its
//! integration tests: wire codec, chunk identity, per-transfer connection
//! state, and the config record. No I/O lives here — sockets and the
//! filesystem are the daemon's concern.

pub mod config;
pub mod connection;
pub mod hash;
pub mod wire;

pub use config::Config;
pub use connection::{AckOutcome, ConnState, Connection, DataOutcome, Direction};
pub use hash::ChunkHash;
pub use wire::{Message, WireError};
