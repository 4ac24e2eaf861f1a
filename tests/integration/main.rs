//! Black-box scenario tests driving the protocol stack end to end —
//! messages are handed directly between peers' `dispatch::route` calls
//! rather than over a real socket, which is the mock transport the
//! scenarios in spec §8 are written against.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use swarm_core::hash::ChunkHash;
use swarm_core::wire::Message;
use swarm_services::chunk_store::{self, ChunkMap};
use swarmd::dispatch;
use swarmd::handshake::HandshakeManager;
use swarmd::scheduler::{CompletedTask, Scheduler, StartOutcome};
use swarmd::transfer::ReliableTransfer;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

struct PeerHarness {
    handshake: HandshakeManager,
    transfer: ReliableTransfer,
    scheduler: Scheduler,
    chunk_store: ChunkMap,
}

impl PeerHarness {
    fn new(self_id: u32, roster: Vec<swarm_services::roster::RosterEntry>, max_conn: usize, chunk_store: ChunkMap) -> Self {
        Self {
            handshake: HandshakeManager::new(self_id, roster, max_conn),
            transfer: ReliableTransfer::new(None),
            scheduler: Scheduler::new(),
            chunk_store,
        }
    }

    fn handle(&mut self, msg: Message, from: SocketAddr, now: Instant) -> (Vec<(SocketAddr, Message)>, Option<CompletedTask>) {
        dispatch::route(
            &mut self.handshake,
            &mut self.transfer,
            &mut self.scheduler,
            &self.chunk_store,
            msg,
            from,
            now,
        )
    }
}

/// Drive messages between two peers until the queue drains, collecting
/// every task this side's scheduler finished along the way.
fn drain_queue(
    peers: &mut HashMap<SocketAddr, PeerHarness>,
    mut queue: VecDeque<(SocketAddr, SocketAddr, Message)>,
    now: Instant,
) -> (Vec<(SocketAddr, CompletedTask)>, bool) {
    let mut completions = Vec::new();
    let mut made_progress = !queue.is_empty();
    while let Some((from, to, msg)) = queue.pop_front() {
        let peer = peers.get_mut(&to).expect("message addressed to unknown peer");
        let (outbox, completed) = peer.handle(msg, from, now);
        for (next_to, next_msg) in outbox {
            queue.push_back((to, next_to, next_msg));
        }
        if let Some(task) = completed {
            completions.push((to, task));
        }
    }
    (completions, made_progress)
}

/// Mimics the event loop's scheduler-dispatch tick: for every hash a
/// peer's scheduler still needs and has no download connection open for,
/// open one against the first known candidate and send GET.
fn dispatch_tick(peers: &mut HashMap<SocketAddr, PeerHarness>, self_addr: SocketAddr, now: Instant) -> VecDeque<(SocketAddr, SocketAddr, Message)> {
    let peer = peers.get_mut(&self_addr).unwrap();
    let to_start: Vec<(ChunkHash, SocketAddr)> = peer
        .scheduler
        .active_hashes()
        .filter(|h| !peer.transfer.has_download_connection(h))
        .filter_map(|h| peer.handshake.get_download_candidates(h).first().map(|&p| (*h, p)))
        .collect();

    let mut queue = VecDeque::new();
    for (hash, candidate) in to_start {
        peer.transfer.create_download_connection(hash, candidate, now);
        let (to, msg) = peer.handshake.send_get(hash, candidate);
        queue.push_back((self_addr, to, msg));
    }
    queue
}

/// Runs message delivery and scheduler-dispatch ticks to a fixed point —
/// the two things the real event loop interleaves every iteration.
fn run_until_idle(
    peers: &mut HashMap<SocketAddr, PeerHarness>,
    initial: VecDeque<(SocketAddr, SocketAddr, Message)>,
    now: Instant,
) -> Vec<(SocketAddr, CompletedTask)> {
    let mut all_completions = Vec::new();
    let mut queue = initial;
    loop {
        let (completions, progressed) = drain_queue(peers, queue, now);
        all_completions.extend(completions);

        let addrs: Vec<SocketAddr> = peers.keys().copied().collect();
        let mut next = VecDeque::new();
        for a in addrs {
            next.extend(dispatch_tick(peers, a, now));
        }
        if next.is_empty() && !progressed {
            break;
        }
        queue = next;
    }
    all_completions
}

fn two_peer_roster() -> Vec<swarm_services::roster::RosterEntry> {
    vec![
        swarm_services::roster::RosterEntry { id: 0, addr: addr(9100) },
        swarm_services::roster::RosterEntry { id: 1, addr: addr(9101) },
    ]
}

/// Scenario 1 — trivial download: B fetches a chunk A already holds.
#[test]
fn trivial_download_completes_with_single_got_line() {
    let roster = two_peer_roster();
    let now = Instant::now();

    let h = ChunkHash::of(b"abc");
    let mut a_store = ChunkMap::new();
    a_store.insert(h.to_hex(), b"abc".to_vec());

    let mut peers = HashMap::new();
    peers.insert(addr(9100), PeerHarness::new(0, roster.clone(), 4, a_store));
    peers.insert(addr(9101), PeerHarness::new(1, roster.clone(), 4, ChunkMap::new()));

    let b = peers.get_mut(&addr(9101)).unwrap();
    let outcome = b.scheduler.start_download(vec![h], "out.bin".into(), &b.chunk_store);
    let StartOutcome::Started(needed) = outcome else {
        panic!("expected Started — peer B does not hold the chunk locally");
    };
    let whohas_outbox = b.handshake.broadcast_whohas(needed, now);
    assert_eq!(whohas_outbox.len(), 1, "only one other roster peer to query");

    let mut queue = VecDeque::new();
    for (to, msg) in whohas_outbox {
        queue.push_back((addr(9101), to, msg));
    }

    let completions = run_until_idle(&mut peers, queue, now);
    assert_eq!(completions.len(), 1, "exactly one GOT line expected");
    let (addr_done, task) = &completions[0];
    assert_eq!(*addr_done, addr(9101));
    assert_eq!(task.output_path, std::path::PathBuf::from("out.bin"));
    assert_eq!(task.chunks.get(&h).map(Vec::as_slice), Some(&b"abc"[..]));
}

/// Scenario 1, continued — the completed task's bytes round-trip through
/// the real on-disk chunk-store codec exactly as the daemon would persist
/// them.
#[test]
fn completed_task_round_trips_through_chunk_store_codec() {
    let h1 = ChunkHash::of(b"one");
    let h2 = ChunkHash::of(b"two");
    let mut chunks = HashMap::new();
    chunks.insert(h1, b"one".to_vec());
    chunks.insert(h2, b"two".to_vec());

    let blob: ChunkMap = chunks.iter().map(|(h, d)| (h.to_hex(), d.clone())).collect();

    let dir = std::env::temp_dir().join(format!("swarm-integration-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("out.bin");

    chunk_store::save(&path, &blob).unwrap();
    let reloaded = chunk_store::load(&path).unwrap();

    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get(&h1.to_hex()), Some(&b"one".to_vec()));
    assert_eq!(reloaded.get(&h2.to_hex()), Some(&b"two".to_vec()));

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 4 — upload admission: once `max_conn` upload slots are in
/// use, a further GET is silently refused and a further WHOHAS is denied
/// regardless of chunk availability.
#[test]
fn upload_admission_bound_denies_once_slots_exhausted() {
    let roster = two_peer_roster();
    let h = ChunkHash::of(b"shared-chunk");
    let mut store = ChunkMap::new();
    store.insert(h.to_hex(), vec![0u8; 16]);

    let mut handshake = HandshakeManager::new(0, roster, 2);

    let peer_a = addr(9200);
    let peer_b = addr(9201);
    assert_eq!(handshake.handle_get(h, peer_a, &store), Some(h));
    assert_eq!(handshake.handle_get(h, peer_b, &store), Some(h));
    assert_eq!(handshake.available_upload_slots(), 0);

    let peer_c = addr(9202);
    assert_eq!(
        handshake.handle_get(h, peer_c, &store),
        None,
        "third GET must not be admitted once both slots are in use"
    );

    let (_, reply) = handshake.handle_whohas(&[h], &store, peer_c);
    assert_eq!(
        reply,
        Message::Denied,
        "WHOHAS must be denied once slots are exhausted, even though the chunk is held"
    );
}

/// Scenario 5 — every needed chunk is already local: the task completes
/// immediately with no WHOHAS broadcast at all.
#[test]
fn download_with_every_chunk_already_local_skips_discovery() {
    let h = ChunkHash::of(b"already-have-it");
    let mut store = ChunkMap::new();
    store.insert(h.to_hex(), b"already-have-it".to_vec());

    let mut scheduler = Scheduler::new();
    let outcome = scheduler.start_download(vec![h], "local.bin".into(), &store);
    assert!(matches!(outcome, StartOutcome::AlreadyComplete));
    assert_eq!(scheduler.active_hashes().count(), 0, "nothing left to discover");
}

/// Scenario 6 — a WHOHAS for a hash no peer holds times out after 30s;
/// the request is cleared from the handshake tracker but the scheduler's
/// task is left pending rather than failed.
#[test]
fn whohas_timeout_clears_tracker_but_leaves_task_pending() {
    let roster = two_peer_roster();
    let mut handshake = HandshakeManager::new(0, roster, 4);

    let h = ChunkHash::of(b"nobody-has-this");
    let mut scheduler = Scheduler::new();
    let store = ChunkMap::new();
    let StartOutcome::Started(needed) = scheduler.start_download(vec![h], "pending.bin".into(), &store) else {
        panic!("expected Started");
    };

    let old = Instant::now() - std::time::Duration::from_secs(31);
    handshake.broadcast_whohas(needed, old);
    handshake.cleanup_old_requests(Instant::now());

    assert!(handshake.get_download_candidates(&h).is_empty());
    assert_eq!(
        scheduler.active_hashes().count(),
        1,
        "the task itself stays pending — only the discovery attempt is cleared"
    );
}

/// A full-size chunk transfers correctly across the dispatch layer over
/// many packets and several congestion-window growth rounds — the same
/// 378-packet shape as the lossy-slow-start scenario, without the loss
/// (that path is covered at the connection-state level already).
#[test]
fn multi_packet_upload_completes_through_dispatch() {
    use swarm_core::wire::CHUNK_SIZE;

    let roster = two_peer_roster();
    let now = Instant::now();

    let chunk_data = vec![0x42u8; CHUNK_SIZE];
    let h = ChunkHash::of(&chunk_data);
    let mut a_store = ChunkMap::new();
    a_store.insert(h.to_hex(), chunk_data.clone());

    let mut peers = HashMap::new();
    peers.insert(addr(9300), PeerHarness::new(0, roster.clone(), 4, a_store));
    peers.insert(addr(9301), PeerHarness::new(1, roster.clone(), 4, ChunkMap::new()));

    let b = peers.get_mut(&addr(9301)).unwrap();
    let StartOutcome::Started(needed) = b.scheduler.start_download(vec![h], "big.bin".into(), &b.chunk_store) else {
        panic!("expected Started");
    };
    let whohas_outbox = b.handshake.broadcast_whohas(needed, now);

    let mut queue = VecDeque::new();
    for (to, msg) in whohas_outbox {
        queue.push_back((addr(9301), to, msg));
    }

    let completions = run_until_idle(&mut peers, queue, now);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].1.chunks.get(&h), Some(&chunk_data));
}

/// Scenario 2 — lossy slow start: uploading a full 524,288-byte chunk
/// (378 DATA packets) across a transport that drops every 17th DATA
/// packet on its first send attempt. The transfer must still complete
/// (final `ack_num == 378`) and the sender's `cwnd` trajectory must show
/// at least one loss-triggered collapse along the way.
///
/// Driven by hand rather than through `run_until_idle`/`drain_queue`:
/// loss injection has to sit between "a message was sent" and "a peer
/// received it", and a dropped DATA packet stalls the sender until its
/// own timeout tick fires — which this harness has to step manually
/// since there's no real 100ms ticker here.
#[test]
fn lossy_slow_start_completes_with_at_least_one_cwnd_collapse() {
    use swarm_core::wire::CHUNK_SIZE;

    let roster = two_peer_roster();
    let mut clock = Instant::now();

    let chunk_data = vec![0x17u8; CHUNK_SIZE];
    let h = ChunkHash::of(&chunk_data);
    let mut a_store = ChunkMap::new();
    a_store.insert(h.to_hex(), chunk_data.clone());

    let peer_a = addr(9500);
    let peer_b = addr(9501);
    let mut peers = HashMap::new();
    peers.insert(peer_a, PeerHarness::new(0, roster.clone(), 4, a_store));
    peers.insert(peer_b, PeerHarness::new(1, roster.clone(), 4, ChunkMap::new()));

    // Discovery: B broadcasts WHOHAS, A answers IHAVE, B's scheduler
    // dispatch opens a download connection and sends GET.
    let b = peers.get_mut(&peer_b).unwrap();
    let StartOutcome::Started(needed) = b.scheduler.start_download(vec![h], "lossy.bin".into(), &b.chunk_store) else {
        panic!("expected Started");
    };
    let whohas_outbox = b.handshake.broadcast_whohas(needed, clock);
    let mut queue = VecDeque::new();
    for (to, msg) in whohas_outbox {
        queue.push_back((peer_b, to, msg));
    }
    drain_queue(&mut peers, queue, clock);
    let mut pending = dispatch_tick(&mut peers, peer_b, clock);

    let mut first_attempt_seen: HashSet<u32> = HashSet::new();
    let mut drop_count = 0u32;
    let mut prev_cwnd: Option<f64> = None;
    let mut observed_cwnd_collapse = false;
    let mut completed_task = None;

    for _round in 0..50_000 {
        if pending.is_empty() {
            // Every in-flight packet was either delivered or dropped.
            // A dropped DATA packet never gets acked, so the only way
            // forward is the upload connection's own timeout, which the
            // real event loop drives every 100ms — step it by hand here.
            clock += Duration::from_secs(4);
            let a = peers.get_mut(&peer_a).unwrap();
            let outbox = a.transfer.handle_timeouts(clock);
            if outbox.is_empty() {
                break;
            }
            for (to, msg) in outbox {
                pending.push_back((peer_a, to, msg));
            }
            continue;
        }

        let (from, to, msg) = pending.pop_front().unwrap();

        if let Message::Data { seq_num, .. } = &msg {
            if first_attempt_seen.insert(*seq_num) {
                drop_count += 1;
                if drop_count % 17 == 0 {
                    continue; // dropped on first attempt, never delivered
                }
            }
        }

        let peer = peers.get_mut(&to).unwrap();
        let (outbox, completed) = peer.handle(msg, from, clock);
        for (next_to, next_msg) in outbox {
            pending.push_back((to, next_to, next_msg));
        }
        if let Some(task) = completed {
            completed_task = Some(task);
            break;
        }

        if let Some(conn) = peers[&peer_a].transfer.upload_connection(peer_b, h) {
            if let Some(prev) = prev_cwnd {
                if conn.cwnd < prev {
                    observed_cwnd_collapse = true;
                }
            }
            prev_cwnd = Some(conn.cwnd);
        }
    }

    let task = completed_task.expect("lossy transfer must still eventually complete");
    assert_eq!(task.chunks.get(&h), Some(&chunk_data));

    let b_conn = peers[&peer_b]
        .transfer
        .download_connection(&h)
        .expect("download connection should still be present, just marked Complete");
    assert_eq!(b_conn.ack_num, 378, "all 378 DATA packets must be delivered in order");

    assert!(drop_count >= 1, "loss injection never dropped a packet — test is vacuous");
    assert!(
        observed_cwnd_collapse,
        "expected at least one congestion-window collapse from injected loss"
    );
}
