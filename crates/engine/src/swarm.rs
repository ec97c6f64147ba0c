//! Owns every peer connection, the listening socket, and the periodic
//! choking / optimistic-unchoke / endgame / tracker-refresh policies.
//!
//! Grounded on `librqbit::peer_state` for the per-peer live-state shape
//! (`LivePeerState`'s bitfield/inflight-requests/tx fields) and
//! `librqbit::session::Session`'s orchestration shape (peer table +
//! periodic policy tasks), adapted to spec.md §4.4's literal policy
//! semantics. Per the REDESIGN FLAGS resolution, there is no fd-poll
//! array: each peer is a `tokio::task` (see `peer.rs`) and this struct is
//! the single logical "swarm driver" that still enforces spec.md §5's
//! ordering guarantees (one driver, so choke decisions / request
//! replenishment / endgame fan-out never race each other).

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;
use rbt_core::{Id20, SpeedEstimator, TorrentMeta, MAX_IN_FLIGHT};
use rbt_tracker::{TrackerClient, TrackerRequest, TrackerRequestEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::bits::bit_set;
use crate::error::EngineError;
use crate::peer::{self, BlockRequest, OutboundMessage, PeerEvent, PeerEventKind, PeerHandle};
use crate::piece_store::{PieceStore, RecordOutcome, VerifyOutcome};

/// How many interested peers we keep unchoked at once (the "downloaders"
/// in spec.md §4.4's choking policy), not counting the optimistic slot.
const UNCHOKE_SLOTS: usize = 4;
const CHOKE_ROTATION_PERIOD: Duration = Duration::from_secs(10);
const OPTIMISTIC_UNCHOKE_PERIOD: Duration = Duration::from_secs(30);
/// Backstop for request replenishment / endgame entry checks; request
/// replenishment also runs inline after every peer event, this just
/// catches anything a missed wakeup left on the table.
const REPLENISH_PERIOD: Duration = Duration::from_millis(250);
/// spec.md §9's reference heuristic for endgame entry.
const ENDGAME_THRESHOLD_BLOCKS: u64 = 100 * MAX_IN_FLIGHT as u64;

pub struct SwarmConfig {
    pub listen_addr: SocketAddr,
    pub max_peers: usize,
    pub seed_after_complete: bool,
    /// If set, only this single address is ever connected to or accepted
    /// from (the CLI's `-A`/`-P` restrict-to-one-peer flags); the tracker
    /// is not queried at all in this mode.
    pub restrict_to: Option<SocketAddr>,
}

struct PeerEntry {
    handle: PeerHandle,
    handshake_done: bool,
    peer_id: Option<Id20>,
    /// Are *we* choked by this peer.
    choked_by_peer: bool,
    /// Are *we* choking this peer.
    choking_peer: bool,
    /// Have we told this peer we're interested.
    interesting_to_peer: bool,
    peer_interested_in_us: bool,
    /// Raw MSB-first bitfield bytes, grown lazily as `have`s arrive
    /// before any `bitfield` message.
    peer_bitfield: Vec<u8>,
    outstanding: VecDeque<BlockRequest>,
    bytes_sent: u64,
    bytes_recv: u64,
    dl_rate: SpeedEstimator,
    ul_rate: SpeedEstimator,
}

impl PeerEntry {
    fn new(handle: PeerHandle) -> Self {
        Self {
            handle,
            handshake_done: false,
            peer_id: None,
            choked_by_peer: true,
            choking_peer: true,
            interesting_to_peer: false,
            peer_interested_in_us: false,
            peer_bitfield: Vec::new(),
            outstanding: VecDeque::with_capacity(MAX_IN_FLIGHT),
            bytes_sent: 0,
            bytes_recv: 0,
            dl_rate: SpeedEstimator::new(Duration::from_secs(20)),
            ul_rate: SpeedEstimator::new(Duration::from_secs(20)),
        }
    }

    fn operational(&self) -> bool {
        self.handshake_done
    }
}

pub struct Swarm {
    torrent: Arc<TorrentMeta>,
    store: Arc<PieceStore>,
    our_peer_id: Id20,
    config: SwarmConfig,
    listener: TcpListener,
    peers: HashMap<SocketAddr, PeerEntry>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    endgame: bool,
}

impl Swarm {
    pub async fn bind(
        torrent: Arc<TorrentMeta>,
        store: Arc<PieceStore>,
        our_peer_id: Id20,
        config: SwarmConfig,
    ) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(EngineError::Io)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            torrent,
            store,
            our_peer_id,
            config,
            listener,
            peers: HashMap::new(),
            events_tx,
            events_rx,
            endgame: false,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The socket actually bound, including the OS-assigned port when
    /// `SwarmConfig::listen_addr` used port 0. Tests bind on an ephemeral
    /// port and read it back here to tell a peer swarm where to connect.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connects to every address in `addrs` not already known and not
    /// excluded by `restrict_to`, up to `max_peers` total.
    pub fn add_peers(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            if self.peers.len() >= self.config.max_peers {
                break;
            }
            if self.peers.contains_key(&addr) {
                continue;
            }
            if let Some(only) = self.config.restrict_to {
                if addr != only {
                    continue;
                }
            }
            let handle = peer::spawn_outbound(addr, self.torrent.info_hash, self.our_peer_id, self.events_tx.clone());
            self.peers.insert(addr, PeerEntry::new(handle));
        }
    }

    /// Runs the swarm until the download completes and seeding was not
    /// requested, or forever (seeding) until the process is killed.
    /// `tracker` is `None` when `restrict_to` was set: in that mode the
    /// tracker is never consulted, per spec.md's restrict-to-one-peer
    /// CLI flags.
    pub async fn run(
        mut self,
        tracker: Option<(TrackerClient, String, Duration)>,
    ) -> Result<(), EngineError> {
        let mut choke_timer = tokio::time::interval(CHOKE_ROTATION_PERIOD);
        let mut optimistic_timer = tokio::time::interval(OPTIMISTIC_UNCHOKE_PERIOD);
        let mut replenish_timer = tokio::time::interval(REPLENISH_PERIOD);

        let (mut tracker_client, announce_url, mut tracker_interval) = match tracker {
            Some((c, u, i)) => (Some(c), Some(u), i),
            None => (None, None, Duration::from_secs(u64::MAX / 2)),
        };
        let mut tracker_timer = tokio::time::interval(tracker_interval);
        // The first announce already happened before `run` was called
        // (the caller seeds the initial peer list); skip the immediate
        // first tick so we don't double-announce right away.
        tracker_timer.tick().await;

        loop {
            if self.store.is_complete() && !self.config.seed_after_complete {
                return Ok(());
            }

            tokio::select! {
                accept = self.listener.accept() => {
                    self.handle_accept(accept);
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event)?;
                    self.replenish_requests();
                }
                _ = choke_timer.tick() => {
                    self.rotate_chokes();
                }
                _ = optimistic_timer.tick() => {
                    self.optimistic_unchoke();
                }
                _ = replenish_timer.tick() => {
                    self.maybe_enter_endgame();
                    self.replenish_requests();
                }
                _ = tracker_timer.tick(), if tracker_client.is_some() => {
                    if let (Some(client), Some(url)) = (tracker_client.as_ref(), announce_url.as_deref()) {
                        if let Some(new_interval) = self.refresh_tracker(client, url).await {
                            if new_interval != tracker_interval {
                                tracker_interval = new_interval;
                                tracker_timer = tokio::time::interval(tracker_interval);
                                tracker_timer.tick().await;
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_accept(&mut self, accept: std::io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accept {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return;
            }
        };
        if let Some(only) = self.config.restrict_to {
            if addr != only {
                tracing::debug!(%addr, "refusing inbound peer outside restrict-to-one-peer mode");
                return;
            }
        }
        if self.peers.len() >= self.config.max_peers {
            tracing::debug!(%addr, "refusing inbound peer, at MAX_PEERS");
            return;
        }
        tracing::info!(%addr, "accepted inbound peer");
        let handle = peer::spawn_inbound(stream, addr, self.torrent.info_hash, self.our_peer_id, self.events_tx.clone());
        self.peers.insert(addr, PeerEntry::new(handle));
    }

    fn handle_event(&mut self, event: PeerEvent) -> Result<(), EngineError> {
        let addr = event.addr;
        match event.kind {
            PeerEventKind::HandshakeDone { peer_id } => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.handshake_done = true;
                    entry.peer_id = Some(peer_id);
                    entry.handle.send(OutboundMessage::Bitfield(self.store.our_bitfield_bytes()));
                }
            }
            PeerEventKind::Bitfield(bits) => {
                if bits.len() != self.store.bitfield_len_bytes() {
                    tracing::warn!(%addr, len = bits.len(), expected = self.store.bitfield_len_bytes(), "bitfield has wrong length, disconnecting");
                    self.remove_peer(addr);
                    return Ok(());
                }
                if !self.store.trailing_pad_is_zero(&bits) {
                    tracing::warn!(%addr, "bitfield has non-zero trailing pad bits, disconnecting");
                    self.remove_peer(addr);
                    return Ok(());
                }
                if let Some(entry) = self.peers.get_mut(&addr) {
                    let total = self.store.total_pieces();
                    for i in 0..total {
                        if crate::bits::bit_get(&bits, i as usize) {
                            self.store.peer_announced_piece(i, true);
                        }
                    }
                    entry.peer_bitfield = bits;
                }
                self.maybe_send_interested(addr);
            }
            PeerEventKind::Have(piece) => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    bit_set(&mut entry.peer_bitfield, piece as usize);
                }
                self.store.peer_announced_piece(piece, true);
                self.maybe_send_interested(addr);
            }
            PeerEventKind::Choke => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.choked_by_peer = true;
                    for req in entry.outstanding.drain(..) {
                        self.store.release_requested(req.piece, req.begin);
                    }
                }
            }
            PeerEventKind::Unchoke => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.choked_by_peer = false;
                }
            }
            PeerEventKind::Interested => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.peer_interested_in_us = true;
                }
            }
            PeerEventKind::NotInterested => {
                if let Some(entry) = self.peers.get_mut(&addr) {
                    entry.peer_interested_in_us = false;
                }
            }
            PeerEventKind::Block { piece, begin, data } => {
                self.handle_block(addr, piece, begin, data)?;
            }
            PeerEventKind::Request(req) => {
                self.handle_incoming_request(addr, req);
            }
            PeerEventKind::Cancel(_req) => {
                // Our uploads are synchronous replies to `request` (see
                // spec.md §9's minimal upload path) — there's no queued
                // send to cancel, so an incoming `cancel` is a no-op.
            }
            PeerEventKind::Disconnected(reason) => {
                tracing::debug!(%addr, reason, "peer disconnected");
                self.remove_peer(addr);
            }
        }
        Ok(())
    }

    fn maybe_send_interested(&mut self, addr: SocketAddr) {
        let Some(entry) = self.peers.get_mut(&addr) else { return };
        if entry.interesting_to_peer || !entry.operational() {
            return;
        }
        if self.store.has_any_needed(&entry.peer_bitfield) {
            entry.interesting_to_peer = true;
            entry.handle.send(OutboundMessage::Interested);
        }
    }

    /// Returns `Err` only for an `IOFatal` failure (spec.md §7): a write
    /// error while committing a verified piece to disk. Every other
    /// `StoreError` variant (`Misaligned`/`OutOfBounds`/`BadLengths`) is a
    /// local, per-block failure and is logged and absorbed here.
    fn handle_block(&mut self, addr: SocketAddr, piece: u32, begin: u32, data: Vec<u8>) -> Result<(), EngineError> {
        let len = data.len() as u64;
        let Some(entry) = self.peers.get_mut(&addr) else { return Ok(()) };
        entry.bytes_recv += len;
        entry.dl_rate.record(len, Instant::now());

        let pos = entry
            .outstanding
            .iter()
            .position(|r| r.piece == piece && r.begin == begin);
        let accepted = match pos {
            Some(i) => {
                entry.outstanding.remove(i);
                true
            }
            None => self.endgame,
        };
        if !accepted {
            tracing::trace!(%addr, piece, begin, "dropping piece message with no matching request");
            return Ok(());
        }

        match self.store.record_block(piece, begin, &data) {
            Ok(RecordOutcome::Verified(VerifyOutcome::Committed)) => {
                tracing::info!(piece, "piece verified");
                self.broadcast(|| OutboundMessage::Have(piece));
                if self.endgame {
                    self.cancel_elsewhere(piece, begin, addr);
                }
            }
            Ok(RecordOutcome::Verified(VerifyOutcome::Failed)) => {
                tracing::warn!(piece, "piece failed verification, re-requesting");
            }
            Ok(RecordOutcome::Buffered) | Ok(RecordOutcome::Ignored) => {}
            Err(crate::error::StoreError::Io(e)) => {
                tracing::error!(%addr, piece, error = %e, "fatal: failed writing verified piece to disk, shutting down");
                return Err(EngineError::Io(e));
            }
            Err(e) => {
                tracing::warn!(%addr, piece, begin, error = %e, "record_block failed");
            }
        }
        Ok(())
    }

    /// Sends `cancel` to every other peer with `(piece, begin)` still
    /// outstanding, and drops it from their queues — the duplicate
    /// `piece` they might still send back will then fail the
    /// outstanding-match check and be silently dropped (spec.md §4.4's
    /// endgame duplicate-response rule).
    fn cancel_elsewhere(&mut self, piece: u32, begin: u32, except: SocketAddr) {
        for (&other_addr, entry) in self.peers.iter_mut() {
            if other_addr == except {
                continue;
            }
            if let Some(i) = entry.outstanding.iter().position(|r| r.piece == piece && r.begin == begin) {
                let req = entry.outstanding.remove(i).unwrap();
                entry.handle.send(OutboundMessage::Cancel(req));
            }
        }
    }

    fn handle_incoming_request(&mut self, addr: SocketAddr, req: BlockRequest) {
        let Some(entry) = self.peers.get_mut(&addr) else { return };
        if entry.choking_peer {
            return;
        }
        if req.len > rbt_core::MAX_REQUESTED_BLOCK_LEN || !self.store.piece_have(req.piece) {
            return;
        }
        let mut buf = vec![0u8; req.len as usize];
        match self.store.read_block(req.piece, req.begin, req.len, &mut buf) {
            Ok(()) => {
                entry.bytes_sent += buf.len() as u64;
                entry.ul_rate.record(buf.len() as u64, Instant::now());
                entry.handle.send(OutboundMessage::Piece {
                    piece: req.piece,
                    begin: req.begin,
                    block: buf,
                });
            }
            Err(e) => {
                tracing::warn!(%addr, piece = req.piece, error = %e, "failed reading block to serve upload");
            }
        }
    }

    fn remove_peer(&mut self, addr: SocketAddr) {
        let Some(entry) = self.peers.remove(&addr) else { return };
        for req in entry.outstanding {
            self.store.release_requested(req.piece, req.begin);
        }
        let total = self.store.total_pieces();
        for i in 0..total {
            if crate::bits::bit_get(&entry.peer_bitfield, i as usize) {
                self.store.peer_announced_piece(i, false);
            }
        }
    }

    fn broadcast(&self, make_msg: impl Fn() -> OutboundMessage) {
        for entry in self.peers.values() {
            if entry.operational() {
                entry.handle.send(make_msg());
            }
        }
    }

    fn maybe_enter_endgame(&mut self) {
        if self.endgame {
            return;
        }
        if self.store.bytes_left() <= ENDGAME_THRESHOLD_BLOCKS * rbt_core::BLOCK_LEN as u64 {
            tracing::info!("entering endgame");
            self.endgame = true;
        }
    }

    /// Step 8 of spec.md §4.4's tick: for each operational, unchoked,
    /// interesting peer with spare request slots, pull blocks from the
    /// store until full. In endgame, instead fan every still-missing
    /// block out to every peer advertising it (duplicates are expected
    /// and reconciled in `handle_block`/`cancel_elsewhere`).
    fn replenish_requests(&mut self) {
        if self.endgame {
            self.replenish_endgame();
            return;
        }
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            loop {
                let Some(entry) = self.peers.get(&addr) else { break };
                if !entry.operational() || entry.choked_by_peer || !entry.interesting_to_peer {
                    break;
                }
                if entry.outstanding.len() >= MAX_IN_FLIGHT {
                    break;
                }
                let Some((piece, begin, len)) = self.store.next_block_for(&entry.peer_bitfield, false) else {
                    break;
                };
                let entry = self.peers.get_mut(&addr).expect("checked above");
                entry.outstanding.push_back(BlockRequest { piece, begin, len });
                entry.handle.send(OutboundMessage::Request(BlockRequest { piece, begin, len }));
            }
        }
    }

    fn replenish_endgame(&mut self) {
        for (piece, begin, len) in self.store.missing_blocks() {
            for entry in self.peers.values_mut() {
                if !entry.operational() || entry.choked_by_peer {
                    continue;
                }
                if entry.outstanding.len() >= MAX_IN_FLIGHT {
                    continue;
                }
                if !crate::bits::bit_get(&entry.peer_bitfield, piece as usize) {
                    continue;
                }
                if entry.outstanding.iter().any(|r| r.piece == piece && r.begin == begin) {
                    continue;
                }
                entry.outstanding.push_back(BlockRequest { piece, begin, len });
                entry.handle.send(OutboundMessage::Request(BlockRequest { piece, begin, len }));
            }
        }
    }

    /// spec.md §4.4's choking policy: rank interested peers by the
    /// relevant rate (download rate while still downloading, upload rate
    /// once seeding), unchoke the top `UNCHOKE_SLOTS`, plus any
    /// not-yet-interested peer whose rate already beats the worst of
    /// that set.
    fn rotate_chokes(&mut self) {
        let now = Instant::now();
        let seeding = self.store.is_complete();
        let mut rates: Vec<(SocketAddr, f64, bool)> = Vec::new();
        for (&addr, entry) in self.peers.iter() {
            if !entry.operational() {
                continue;
            }
            let rate = if seeding {
                entry.ul_rate.bytes_per_second(now)
            } else {
                entry.dl_rate.bytes_per_second(now)
            };
            rates.push((addr, rate, entry.peer_interested_in_us));
        }

        let unchoke_set = select_downloaders(&rates, UNCHOKE_SLOTS);

        for (&addr, entry) in self.peers.iter_mut() {
            if !entry.operational() {
                continue;
            }
            let should_unchoke = unchoke_set.contains(&addr);
            if should_unchoke && entry.choking_peer {
                entry.choking_peer = false;
                entry.handle.send(OutboundMessage::Unchoke);
            } else if !should_unchoke && !entry.choking_peer {
                entry.choking_peer = true;
                entry.handle.send(OutboundMessage::Choke);
            }
        }
    }

    /// spec.md §4.4's optimistic unchoke: among peers currently choked
    /// and interested, unchoke one chosen uniformly at random.
    fn optimistic_unchoke(&mut self) {
        let mut rng = rand::rng();
        let pick = self
            .peers
            .iter()
            .filter(|(_, e)| e.operational() && e.choking_peer && e.peer_interested_in_us)
            .map(|(&addr, _)| addr)
            .choose(&mut rng);
        if let Some(addr) = pick {
            if let Some(entry) = self.peers.get_mut(&addr) {
                entry.choking_peer = false;
                entry.handle.send(OutboundMessage::Unchoke);
                tracing::debug!(%addr, "optimistic unchoke");
            }
        }
    }

    /// Queries the tracker, connects to any newly learned peers up to
    /// `MAX_PEERS`, and returns the tracker-supplied refresh interval if
    /// it differs from what we're currently using. A failed query is
    /// spec.md §7's `TrackerUnavailable`: logged and dropped for this
    /// cycle, the swarm keeps serving the peers it already has.
    async fn refresh_tracker(&mut self, client: &TrackerClient, announce_url: &str) -> Option<Duration> {
        let req = TrackerRequest {
            announce_url,
            info_hash: &self.torrent.info_hash,
            peer_id: &self.our_peer_id,
            event: None,
            port: self.config.listen_addr.port(),
            uploaded: 0,
            downloaded: self.store.bytes_downloaded(),
            left: self.store.bytes_left(),
            numwant: Some(50),
        };
        match tokio::time::timeout(Duration::from_secs(15), client.announce(&req)).await {
            Ok(Ok(resp)) => {
                tracing::info!(peers = resp.peers.len(), interval = resp.interval, "tracker refreshed");
                self.add_peers(resp.peers);
                Some(Duration::from_secs(resp.interval.max(5)))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "tracker query failed, retrying next interval");
                None
            }
            Err(_) => {
                tracing::warn!("tracker query timed out, retrying next interval");
                None
            }
        }
    }

    /// Announces once with the `started` event before the main loop
    /// begins, seeding the initial peer list. Returns the tracker's
    /// advertised refresh interval.
    pub async fn initial_announce(
        &mut self,
        client: &TrackerClient,
        announce_url: &str,
    ) -> Result<Duration, rbt_tracker::TrackerError> {
        let req = TrackerRequest {
            announce_url,
            info_hash: &self.torrent.info_hash,
            peer_id: &self.our_peer_id,
            event: Some(TrackerRequestEvent::Started),
            port: self.config.listen_addr.port(),
            uploaded: 0,
            downloaded: self.store.bytes_downloaded(),
            left: self.store.bytes_left(),
            numwant: Some(50),
        };
        let resp = client.announce(&req).await?;
        self.add_peers(resp.peers);
        Ok(Duration::from_secs(resp.interval.max(5)))
    }
}

/// Top-k selection by rate among interested peers, plus any uninterested
/// peer whose rate already beats the k-th best. A free function so the
/// selection policy (spec.md's REDESIGN FLAGS: "bubble sort" →
/// "partial sort / top-k") is testable without a running `Swarm`.
fn select_downloaders(candidates: &[(SocketAddr, f64, bool)], slots: usize) -> std::collections::HashSet<SocketAddr> {
    let mut interested: Vec<&(SocketAddr, f64, bool)> = candidates.iter().filter(|(_, _, i)| *i).collect();
    interested.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top: Vec<&(SocketAddr, f64, bool)> = interested.into_iter().take(slots).collect();
    let floor = top.last().map(|(_, r, _)| *r).unwrap_or(0.0);

    let mut out: std::collections::HashSet<SocketAddr> = top.iter().map(|(a, _, _)| *a).collect();
    for (addr, rate, interested) in candidates {
        if !interested && *rate > floor && *rate > 0.0 {
            out.insert(*addr);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> SocketAddr {
        format!("127.0.0.1:{}", 10000 + n as u16).parse().unwrap()
    }

    #[test]
    fn select_downloaders_picks_top_k_interested() {
        let candidates = vec![
            (addr(1), 100.0, true),
            (addr(2), 50.0, true),
            (addr(3), 200.0, true),
            (addr(4), 10.0, true),
            (addr(5), 5.0, true),
        ];
        let picked = select_downloaders(&candidates, 4);
        assert_eq!(picked.len(), 4);
        assert!(picked.contains(&addr(3)));
        assert!(picked.contains(&addr(1)));
        assert!(picked.contains(&addr(2)));
        assert!(picked.contains(&addr(4)));
        assert!(!picked.contains(&addr(5)));
    }

    #[test]
    fn select_downloaders_unchokes_fast_uninterested_peer() {
        let candidates = vec![
            (addr(1), 100.0, true),
            (addr(2), 90.0, true),
            (addr(3), 80.0, true),
            (addr(4), 70.0, true),
            (addr(5), 500.0, false), // faster than the floor, should still get in
        ];
        let picked = select_downloaders(&candidates, 4);
        assert!(picked.contains(&addr(5)));
    }

    #[test]
    fn select_downloaders_ignores_slow_uninterested_peer() {
        let candidates = vec![
            (addr(1), 100.0, true),
            (addr(2), 90.0, true),
            (addr(3), 80.0, true),
            (addr(4), 70.0, true),
            (addr(5), 1.0, false),
        ];
        let picked = select_downloaders(&candidates, 4);
        assert!(!picked.contains(&addr(5)));
    }

    #[test]
    fn select_downloaders_with_fewer_than_k_interested() {
        let candidates = vec![(addr(1), 10.0, true)];
        let picked = select_downloaders(&candidates, 4);
        assert_eq!(picked.len(), 1);
    }
}
