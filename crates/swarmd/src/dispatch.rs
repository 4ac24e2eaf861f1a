//! Routes one decoded wire message to the right manager. Kept separate
//! from `event_loop` so the glue between handshake/transfer/scheduler
//! is a plain function rather than inline `match` arms in the loop body.

use std::net::SocketAddr;
use std::time::Instant;

use swarm_core::wire::Message;
use swarm_services::chunk_store::ChunkMap;

use crate::handshake::HandshakeManager;
use crate::scheduler::{CompletedTask, Scheduler};
use crate::transfer::ReliableTransfer;

/// Handle one inbound message. Returns the outbox of replies to send and,
/// if a download task just finished, the data to persist.
pub fn route(
    handshake: &mut HandshakeManager,
    transfer: &mut ReliableTransfer,
    scheduler: &mut Scheduler,
    chunk_store: &ChunkMap,
    msg: Message,
    from: SocketAddr,
    now: Instant,
) -> (Vec<(SocketAddr, Message)>, Option<CompletedTask>) {
    match msg {
        Message::WhoHas(hashes) => {
            let reply = handshake.handle_whohas(&hashes, chunk_store, from);
            (vec![reply], None)
        }

        Message::IHave(hashes) => {
            handshake.handle_ihave(&hashes, from);
            (Vec::new(), None)
        }

        Message::Denied => {
            handshake.handle_denied(from);
            (Vec::new(), None)
        }

        Message::Get(hash) => match handshake.handle_get(hash, from, chunk_store) {
            Some(hash) => {
                let data = chunk_store.get(&hash.to_hex()).cloned().unwrap_or_default();
                let outbox = transfer.create_upload_connection(from, hash, &data, now);
                (outbox, None)
            }
            None => (Vec::new(), None),
        },

        Message::Data { seq_num, payload } => {
            let (ack, completed) = transfer.handle_data_packet(from, seq_num, payload, now);
            let mut outbox = Vec::new();
            outbox.extend(ack);

            let Some(completed) = completed else {
                return (outbox, None);
            };
            let finished = scheduler.complete_chunk(completed.chunk_hash, completed.data);
            (outbox, finished)
        }

        Message::Ack { ack_num } => {
            let outbox = transfer.handle_ack_packet(from, ack_num, now);
            (outbox, None)
        }
    }
}
