//! Download scheduler — one `DownloadTask` per `DOWNLOAD` command, and
//! the reverse index that routes a completed chunk back to its task
//! (spec §4.4).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use swarm_core::hash::ChunkHash;
use swarm_services::chunk_store::ChunkMap;

/// Documented (soft) concurrency target from spec §4.4. Not enforced
/// anywhere in the dispatch path — `download_manager.py::schedule_downloads`
/// never checks `self.max_concurrent_downloads` either, so every needed
/// chunk with a known candidate gets a download connection on the same
/// tick, same as the source.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 10;

pub struct DownloadTask {
    pub output_path: PathBuf,
    pub needed: HashSet<ChunkHash>,
    pub received: HashMap<ChunkHash, Vec<u8>>,
    pub started_at: Instant,
    pub completed: bool,
}

impl DownloadTask {
    fn is_complete(&self) -> bool {
        self.received.len() >= self.needed.len()
    }

    fn add_chunk(&mut self, hash: ChunkHash, data: Vec<u8>) -> bool {
        if self.needed.contains(&hash) && !self.received.contains_key(&hash) {
            self.received.insert(hash, data);
            if self.is_complete() {
                self.completed = true;
            }
            true
        } else {
            false
        }
    }
}

pub enum StartOutcome {
    /// Every needed hash was already in the local chunk store.
    AlreadyComplete,
    Started(Vec<ChunkHash>),
}

pub struct CompletedTask {
    pub output_path: PathBuf,
    pub chunks: HashMap<ChunkHash, Vec<u8>>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: HashMap<PathBuf, DownloadTask>,
    /// hash -> owning task. A hash belongs to at most one task; a second
    /// command naming the same hash silently takes over (last-writer-wins,
    /// an open question the spec resolves this way rather than rejecting
    /// or merging).
    active: HashMap<ChunkHash, PathBuf>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task for `needed_hashes`, dropping any already present
    /// in `chunk_store`. Returns `AlreadyComplete` (nothing to fetch) or
    /// the residual set to discover via WHOHAS.
    pub fn start_download(
        &mut self,
        needed_hashes: Vec<ChunkHash>,
        output_path: PathBuf,
        chunk_store: &ChunkMap,
    ) -> StartOutcome {
        let still_needed: Vec<ChunkHash> = needed_hashes
            .into_iter()
            .filter(|h| !chunk_store.contains_key(&h.to_hex()))
            .collect();

        if still_needed.is_empty() {
            return StartOutcome::AlreadyComplete;
        }

        for hash in &still_needed {
            self.active.insert(*hash, output_path.clone());
        }

        self.tasks.insert(
            output_path.clone(),
            DownloadTask {
                output_path,
                needed: still_needed.iter().copied().collect(),
                received: HashMap::new(),
                started_at: Instant::now(),
                completed: false,
            },
        );

        StartOutcome::Started(still_needed)
    }

    /// Every hash any task still needs, regardless of whether a download
    /// connection is already in flight for it.
    pub fn active_hashes(&self) -> impl Iterator<Item = &ChunkHash> {
        self.active.keys()
    }

    /// Attach a completed chunk's bytes to its owning task. Returns the
    /// task if this was the chunk that finished it.
    pub fn complete_chunk(&mut self, hash: ChunkHash, data: Vec<u8>) -> Option<CompletedTask> {
        let output_path = self.active.get(&hash)?.clone();
        let task = self.tasks.get_mut(&output_path)?;
        if task.add_chunk(hash, data) && task.is_complete() {
            Some(CompletedTask {
                output_path,
                chunks: task.received.clone(),
            })
        } else {
            None
        }
    }

    /// Drop a finished task and its reverse-index entries.
    pub fn remove_task(&mut self, output_path: &PathBuf) {
        if let Some(task) = self.tasks.remove(output_path) {
            for hash in task.needed {
                if self.active.get(&hash) == Some(output_path) {
                    self.active.remove(&hash);
                }
            }
        }
    }
}
