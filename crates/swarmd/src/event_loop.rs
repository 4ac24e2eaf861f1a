//! The single-threaded, cooperative event loop (spec §4.5). Owns every
//! manager as a plain field — no `Arc`/`Mutex`/`DashMap` anywhere in this
//! crate, cross-component calls are plain method calls or small owned
//! values handed back up to this loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use swarm_core::hash::ChunkHash;
use swarm_core::wire::{self, Message};
use swarm_services::chunk_store::{self, ChunkMap};
use swarm_services::{chunklist, roster::RosterEntry};

use crate::dispatch;
use crate::handshake::HandshakeManager;
use crate::scheduler::{Scheduler, StartOutcome};
use crate::transfer::ReliableTransfer;
use crate::transport::Transport;

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

pub struct EventLoop<T: Transport> {
    transport: T,
    handshake: HandshakeManager,
    transfer: ReliableTransfer,
    scheduler: Scheduler,
    chunk_store: ChunkMap,
    last_cleanup: Instant,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(
        transport: T,
        self_id: u32,
        roster: Vec<RosterEntry>,
        max_conn: usize,
        fixed_timeout_secs: Option<u64>,
        chunk_store: ChunkMap,
    ) -> Self {
        Self {
            transport,
            handshake: HandshakeManager::new(self_id, roster, max_conn),
            transfer: ReliableTransfer::new(fixed_timeout_secs),
            scheduler: Scheduler::new(),
            chunk_store,
            last_cleanup: Instant::now(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received interrupt, shutting down");
                    return Ok(());
                }
                datagram = self.transport.recv_from() => {
                    match datagram {
                        Ok((bytes, from)) => self.handle_datagram(&bytes, from).await,
                        Err(err) => tracing::warn!(%err, "datagram receive failed"),
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_command(&line).await,
                        Ok(None) => {} // stdin closed; keep serving peers
                        Err(err) => tracing::warn!(%err, "stdin read failed"),
                    }
                }
                _ = ticker.tick() => {}
            }

            self.run_timeout_tick().await;

            if self.last_cleanup.elapsed() > CLEANUP_INTERVAL {
                self.run_cleanup();
                self.last_cleanup = Instant::now();
            }

            self.run_scheduler_dispatch().await;
        }
    }

    async fn send_all(&self, outbox: Vec<(SocketAddr, Message)>) {
        for (addr, msg) in outbox {
            match wire::encode(&msg) {
                Ok(bytes) => {
                    if let Err(err) = self.transport.send_to(&bytes, addr).await {
                        tracing::warn!(%addr, %err, "send failed");
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to encode outgoing message"),
            }
        }
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let msg = match wire::decode(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(%from, %err, "dropping malformed datagram");
                return;
            }
        };

        let now = Instant::now();
        let (outbox, completed) = dispatch::route(
            &mut self.handshake,
            &mut self.transfer,
            &mut self.scheduler,
            &self.chunk_store,
            msg,
            from,
            now,
        );
        self.send_all(outbox).await;

        if let Some(task) = completed {
            self.persist_completed_task(task.output_path, task.chunks);
        }
    }

    async fn handle_command(&mut self, line: &str) {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("DOWNLOAD"), Some(chunklist_path), Some(output_path)) => {
                self.start_download(chunklist_path, output_path).await;
            }
            (None, _, _) => {}
            _ => tracing::warn!(%line, "unrecognized command"),
        }
    }

    async fn start_download(&mut self, chunklist_path: &str, output_path: &str) {
        let hashes = match chunklist::load(std::path::Path::new(chunklist_path)) {
            Ok(hashes) => hashes,
            Err(err) => {
                tracing::warn!(%chunklist_path, %err, "failed to read chunklist");
                return;
            }
        };

        let output_path = PathBuf::from(output_path);
        match self
            .scheduler
            .start_download(hashes, output_path.clone(), &self.chunk_store)
        {
            StartOutcome::AlreadyComplete => {
                println!("GOT {}", output_path.display());
            }
            StartOutcome::Started(needed) => {
                let outbox = self.handshake.broadcast_whohas(needed, Instant::now());
                self.send_all(outbox).await;
            }
        }
    }

    async fn run_timeout_tick(&mut self) {
        let now = Instant::now();
        let outbox = self.transfer.handle_timeouts(now);
        self.send_all(outbox).await;
    }

    fn run_cleanup(&mut self) {
        self.handshake.cleanup_old_requests(Instant::now());
        for finished in self.transfer.cleanup_finished_connections() {
            self.handshake.release_upload_slot(finished.peer_addr, finished.chunk_hash);
        }
    }

    async fn run_scheduler_dispatch(&mut self) {
        let now = Instant::now();
        let candidates: Vec<(ChunkHash, SocketAddr)> = self
            .scheduler
            .active_hashes()
            .filter(|hash| !self.transfer.has_download_connection(hash))
            .filter_map(|hash| {
                self.handshake
                    .get_download_candidates(hash)
                    .first()
                    .map(|&peer| (*hash, peer))
            })
            .collect();

        let mut outbox = Vec::new();
        for (hash, peer) in candidates {
            self.transfer.create_download_connection(hash, peer, now);
            outbox.push(self.handshake.send_get(hash, peer));
        }
        self.send_all(outbox).await;
    }

    fn persist_completed_task(&mut self, output_path: PathBuf, chunks: std::collections::HashMap<ChunkHash, Vec<u8>>) {
        let blob: ChunkMap = chunks.into_iter().map(|(h, d)| (h.to_hex(), d)).collect();
        match chunk_store::save(&output_path, &blob) {
            Ok(()) => println!("GOT {}", output_path.display()),
            Err(err) => tracing::warn!(%err, path = %output_path.display(), "failed to persist completed download"),
        }
        self.scheduler.remove_task(&output_path);
    }
}
