use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};
use crate::{
    blacklist::Blacklist,
    block::{BlockData, BlockInfo},
    choker::{LeechingChoker, PeerRank, Rechoke, SeedingChoker},
    config::{Config, ConfigError},
    jobs::{Job, JobQueue},
    p2p::{PeerConnection, PeerEvent, PeerManager},
    piecedb::PieceDb,
    progress::PieceProgress,
    selector::{PieceSelector, RarestFirstSelector},
    stats::TorrentStats,
    timer::EventTimer,
    transport::{NetHandle, Transport, TransportError},
};


// Rate-based choking runs every 10 seconds, the optimistic slot rotates
// every 30.
const RECHOKE_INTERVAL: Duration = Duration::from_secs(10);
const OPTIMISTIC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("refusing to connect to ourselves")]
    SelfConnect,

    #[error("{0} is already connected")]
    DuplicatePeer(SocketAddr),

    #[error("{0} is banned")]
    Banned(SocketAddr),

    #[error("peer connection limit reached")]
    PeerLimit,

    #[error("unknown net handle {0}")]
    UnknownPeer(NetHandle),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    Rechoke,
    Optimistic,
}

// Outcome of taking in one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockWrite {

    // The block finished its piece and the piece verified.
    Completed,

    // Stored, piece still incomplete.
    Accepted,

    // Storage refused it; the block stays missing for re-request.
    Failed,

    // The piece filled up but its hash did not match.
    HashMismatch,

}

// The mediator for one torrent. Owns the peer set, the piece bookkeeping,
// the selector, and the chokers; the host owns sockets and the clock and
// drives this through dispatch_from_buffer and periodic. All mutation runs
// under `&mut self`, which is what serializes I/O callbacks against ticks.
pub struct DownloadManager {

    config: Config,

    transport: Box<dyn Transport>,

    peers: PeerManager,

    // Declared above the db so peers' pieces outlive selector queries on drop.
    selector: Box<dyn PieceSelector>,

    db: Box<dyn PieceDb>,

    progress: PieceProgress,

    jobs: JobQueue,

    timer: EventTimer<TimerEvent>,

    timers_armed: bool,

    blacklist: Blacklist,

    leech_choker: LeechingChoker,

    seed_choker: SeedingChoker,

}

impl DownloadManager {

    pub fn new(
        config: Config,
        transport: Box<dyn Transport>,
        db: Box<dyn PieceDb>,
        selector: Option<Box<dyn PieceSelector>>,
    ) -> Result<DownloadManager, ConfigError> {

        config.validate()?;
        if db.num_pieces() != config.num_pieces {
            return Err(ConfigError::PieceCountMismatch {
                expected: config.num_pieces,
                actual: db.num_pieces(),
            });
        }

        let scan_db = selector.is_none();
        let mut dm = DownloadManager {
            progress: PieceProgress::new(config.num_pieces),
            peers: PeerManager::new(),
            selector: selector
                .unwrap_or_else(|| Box::new(RarestFirstSelector::new(config.num_pieces))),
            db,
            jobs: JobQueue::new(),
            timer: EventTimer::new(),
            timers_armed: false,
            blacklist: Blacklist::new(),
            leech_choker: LeechingChoker::new(config.max_active_peers),
            seed_choker: SeedingChoker::new(config.max_active_peers),
            transport,
            config,
        };
        if scan_db {
            dm.check_pieces();
        }
        Ok(dm)
    }

    // Mark pieces the db already holds complete into the progress set and
    // the selector, e.g. when resuming a download.
    pub fn check_pieces(&mut self) {
        for idx in 0..self.db.num_pieces() {
            let complete = self.db.piece(idx).map_or(false, |p| p.all_received());
            if complete && self.progress.mark_complete(idx) {
                self.selector.have_piece(idx);
            }
        }
        tracing::info!(
            "{}/{} pieces already complete",
            self.progress.num_complete(),
            self.progress.num_pieces(),
        );
    }

    // Admit a peer. Inbound connections arrive with a net handle; without
    // one the transport is asked for an outbound connect and completion
    // lands later in peer_connected / peer_connect_fail.
    pub fn add_peer(
        &mut self,
        addr: SocketAddr,
        net_handle: Option<NetHandle>,
        now: Instant,
    ) -> Result<NetHandle, DownloadError> {

        if addr == self.config.listen_address {
            tracing::debug!("refused self-connect to {}", addr);
            return Err(DownloadError::SelfConnect);
        }
        if self.blacklist.is_banned(&addr) {
            tracing::debug!("refused banned peer {}", addr);
            return Err(DownloadError::Banned(addr));
        }
        if self.peers.len() >= self.config.max_peer_connections {
            return Err(DownloadError::PeerLimit);
        }
        if self.peers.contains_addr(&addr) {
            return Err(DownloadError::DuplicatePeer(addr));
        }

        let outbound = net_handle.is_none();
        let handle = match net_handle {
            Some(handle) => handle,
            None => self.transport.connect(addr)?,
        };
        let pc = PeerConnection::new(addr, &self.config, outbound, now);
        if !self.peers.insert(handle, pc) {
            return Err(DownloadError::DuplicatePeer(addr));
        }
        self.selector.add_peer(handle);
        tracing::info!("added {} peer {} as {}", if outbound { "outbound" } else { "inbound" }, addr, handle);
        Ok(handle)
    }

    // Outbound connect completed; the connection opens with its handshake.
    pub fn peer_connected(&mut self, handle: NetHandle, now: Instant) -> Result<(), DownloadError> {
        let pc = self.peers.get_mut(handle).ok_or(DownloadError::UnknownPeer(handle))?;
        pc.on_connect(now);
        self.flush(handle, now);
        Ok(())
    }

    // Outbound connect failed; the peer is swept at the next tick.
    pub fn peer_connect_fail(&mut self, handle: NetHandle) {
        if let Some(pc) = self.peers.get_mut(handle) {
            pc.on_connect_fail();
        }
    }

    pub fn remove_peer(&mut self, handle: NetHandle) {
        let Some(mut pc) = self.peers.remove(handle) else { return };
        tracing::info!("removing peer {}", pc.address());
        let blocks = pc.giveback_all();
        self.giveback_blocks(handle, blocks);
        self.selector.remove_peer(handle);
        self.transport.close(handle);
    }

    // Entry point for inbound bytes. A protocol error removes the peer and
    // is not surfaced to the host; only an unknown handle is.
    pub fn dispatch_from_buffer(
        &mut self,
        handle: NetHandle,
        data: &[u8],
        now: Instant,
    ) -> Result<(), DownloadError> {
        let pc = self.peers.get_mut(handle).ok_or(DownloadError::UnknownPeer(handle))?;
        if let Err(e) = pc.handle_bytes(data, &self.progress, now) {
            tracing::warn!("disconnecting {}: {}", pc.address(), e);
            self.remove_peer(handle);
            return Ok(());
        }
        self.drain_peer(handle, now);
        Ok(())
    }

    // One tick. Returns false once the torrent is complete and configured
    // to stop, after which the host should drop the manager.
    pub fn periodic(&mut self, now: Instant, stats: Option<&mut TorrentStats>) -> bool {

        if self.progress.is_seed() && self.config.shutdown_when_complete {
            tracing::info!("torrent complete, shutting down");
            if let Some(stats) = stats {
                self.fill_stats(stats);
            }
            return false;
        }

        if !self.timers_armed {
            self.timer.schedule(now, RECHOKE_INTERVAL, TimerEvent::Rechoke);
            self.timer.schedule(now, OPTIMISTIC_INTERVAL, TimerEvent::Optimistic);
            self.timers_armed = true;
        }

        // Work deferred out of dispatch runs first, in arrival order.
        while let Some(job) = self.jobs.pop() {
            match job {
                Job::PollBlock { peer } => self.poll_blocks(peer, now),
            }
        }

        for event in self.timer.step(now) {
            match event {
                TimerEvent::Rechoke => {
                    self.rechoke(now);
                    self.timer.schedule(now, RECHOKE_INTERVAL, TimerEvent::Rechoke);
                },
                TimerEvent::Optimistic => {
                    self.rotate_optimistic(now);
                    self.timer.schedule(now, OPTIMISTIC_INTERVAL, TimerEvent::Optimistic);
                },
            }
        }

        let mut dead = Vec::new();
        for handle in self.peers.handles() {
            let Some(pc) = self.peers.get_mut(handle) else { continue };
            if pc.is_failed() {
                dead.push(handle);
                continue;
            }
            if let Err(e) = pc.periodic(now) {
                tracing::warn!("disconnecting {}: {}", pc.address(), e);
                dead.push(handle);
                continue;
            }
            self.drain_peer(handle, now);
        }
        for handle in dead {
            self.remove_peer(handle);
        }

        if let Some(stats) = stats {
            self.fill_stats(stats);
        }
        true
    }

    // Drop every peer, giving their requests back and closing their
    // transport handles.
    pub fn shutdown(&mut self) {
        for handle in self.peers.handles() {
            self.remove_peer(handle);
        }
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn piecedb(&self) -> &dyn PieceDb {
        &*self.db
    }

    pub fn is_seed(&self) -> bool {
        self.progress.is_seed()
    }

    // Act on everything a connection raised, then ship its queued bytes.
    fn drain_peer(&mut self, handle: NetHandle, now: Instant) {
        let events = match self.peers.get_mut(handle) {
            Some(pc) => pc.take_events(),
            None => return,
        };
        for event in events {
            match event {
                PeerEvent::PollBlocks => self.jobs.push(Job::PollBlock { peer: handle }),
                PeerEvent::BlockIn(block) => {
                    self.push_block(handle, block, now);
                },
                PeerEvent::BlockOut(request) => self.serve_block(handle, request, now),
                PeerEvent::PeerHas(idx) => self.selector.peer_have_piece(handle, idx),
                PeerEvent::Giveback(blocks) => self.giveback_blocks(handle, blocks),
            }
        }
        self.flush(handle, now);
    }

    // Ship a connection's queued bytes; a refused send fails the peer.
    fn flush(&mut self, handle: NetHandle, _now: Instant) {
        let Some(bytes) = self.peers.get_mut(handle).and_then(|pc| pc.take_outgoing()) else {
            return;
        };
        if let Err(e) = self.transport.send(handle, &bytes) {
            tracing::warn!("send to {} failed: {}", handle, e);
            if let Some(pc) = self.peers.get_mut(handle) {
                pc.mark_failed();
            }
        }
    }

    // Fill a peer's request pipeline: first finish pieces it already has in
    // flight, then ask the selector for fresh ones.
    fn poll_blocks(&mut self, handle: NetHandle, now: Instant) {
        let Some(pc) = self.peers.get_mut(handle) else { return };
        if !pc.ready_for_requests() {
            return;
        }

        let mut in_flight = pc.pending_pieces();
        in_flight.retain(|&idx| self.db.piece(idx).map_or(false, |p| !p.fully_requested()));
        in_flight.reverse();

        while pc.has_pipeline_room() {
            let idx = match in_flight.pop() {
                Some(idx) => idx,
                None => match self.selector.poll_piece(handle) {
                    Some(idx) => idx,
                    None => break,
                },
            };
            let Some(piece) = self.db.piece_mut(idx) else {
                debug_assert!(false, "selector produced piece {} the db lacks", idx);
                break;
            };
            while pc.has_pipeline_room() {
                match piece.poll_block_request() {
                    Some(block) => {
                        tracing::trace!("requesting {:?} from {}", block, handle);
                        pc.request_block(now, block);
                    },
                    None => break,
                }
            }
        }
        self.flush(handle, now);
    }

    // Store a delivered block, driving verification and completion once the
    // piece fills up.
    fn push_block(&mut self, handle: NetHandle, block: BlockData, now: Instant) -> BlockWrite {
        let info = block.info();
        let idx = info.piece_idx;
        let Some(from) = self.peers.get(handle).map(|pc| pc.address()) else {
            return BlockWrite::Failed;
        };

        match self.db.piece(idx) {
            Some(piece) if info.len > 0 && info.offset + info.len <= piece.len => {
                // A duplicate must not clobber data we already verified in.
                if piece.block_received(&info) {
                    tracing::debug!("duplicate block {:?} from {}", info, from);
                    return BlockWrite::Accepted;
                }
            },
            _ => {
                tracing::warn!("block {:?} does not fit any piece", info);
                return BlockWrite::Failed;
            },
        }

        if let Err(e) = self.db.write_block(&block) {
            tracing::warn!("write of block {:?} failed: {}", info, e);
            if let Some(piece) = self.db.piece_mut(idx) {
                piece.giveback_block(&info);
            }
            return BlockWrite::Failed;
        }

        let Some(piece) = self.db.piece_mut(idx) else { return BlockWrite::Failed };
        piece.mark_received(&info, from);
        if !piece.all_received() {
            return BlockWrite::Accepted;
        }

        // Last block in: read the piece back and verify it.
        let data = match self.db.piece_data(idx) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("read back of piece {} failed: {}", idx, e);
                if let Some(piece) = self.db.piece_mut(idx) {
                    piece.giveback_block(&info);
                }
                return BlockWrite::Failed;
            },
        };
        let verified = self.db.piece(idx).map_or(false, |p| p.verify(&data));

        if verified {
            self.progress.mark_complete(idx);
            // Retire the piece before anything could re-select it.
            self.selector.have_piece(idx);
            tracing::info!(
                "piece {} complete, {}/{} pieces",
                idx,
                self.progress.num_complete(),
                self.progress.num_pieces(),
            );
            self.broadcast_have(idx, now);
            if self.progress.is_seed() {
                tracing::info!("download complete, now seeding");
            }
            BlockWrite::Completed
        } else {
            self.handle_corrupt_piece(handle, idx);
            BlockWrite::HashMismatch
        }
    }

    // A filled piece failed its hash: blame the contributors, reset the
    // piece, and put it back in play.
    fn handle_corrupt_piece(&mut self, handle: NetHandle, idx: usize) {
        let contributors = self.db.piece_mut(idx).map(|p| p.reset()).unwrap_or_default();
        tracing::warn!(
            "piece {} failed verification, {} contributor(s)",
            idx,
            contributors.len(),
        );

        let mut banned = Vec::new();
        if let [only] = contributors[..] {
            // A lone contributor owns the corruption outright.
            self.blacklist.ban(idx, only);
            banned.push(only);
        } else {
            for peer in contributors {
                if self.blacklist.suspect(idx, peer) {
                    banned.push(peer);
                }
            }
        }

        self.selector.peer_giveback_piece(handle, idx);
        for addr in banned {
            if let Some(handle) = self.peers.handle_for(&addr) {
                self.remove_peer(handle);
            }
        }
    }

    // Read a requested block and queue it on the requesting connection.
    fn serve_block(&mut self, handle: NetHandle, request: BlockInfo, now: Instant) {
        match self.db.read_block(&request) {
            Ok(data) => {
                if let Some(pc) = self.peers.get_mut(handle) {
                    pc.serve_block(now, BlockData {
                        piece_idx: request.piece_idx,
                        offset: request.offset,
                        data,
                    });
                }
            },
            Err(e) => tracing::warn!("read of block {:?} failed: {}", request, e),
        }
    }

    // Return abandoned requests to their pieces and the affected pieces to
    // the selector.
    fn giveback_blocks(&mut self, handle: NetHandle, blocks: Vec<BlockInfo>) {
        let mut pieces: Vec<usize> = blocks.iter().map(|b| b.piece_idx).collect();
        for block in &blocks {
            if let Some(piece) = self.db.piece_mut(block.piece_idx) {
                piece.giveback_block(block);
            }
        }
        pieces.sort_unstable();
        pieces.dedup();
        for idx in pieces {
            self.selector.peer_giveback_piece(handle, idx);
        }
    }

    fn broadcast_have(&mut self, idx: usize, now: Instant) {
        for handle in self.peers.handles() {
            if let Some(pc) = self.peers.get_mut(handle) {
                if pc.handshake_received() {
                    pc.send_have(now, idx);
                }
            }
            self.flush(handle, now);
        }
    }

    fn choker_ranks(&self) -> Vec<PeerRank> {
        self.peers
            .iter()
            .filter(|(_, pc)| pc.handshake_received())
            .map(|(handle, pc)| PeerRank {
                peer: handle,
                drate: pc.drate(),
                urate: pc.urate(),
                interested: pc.peer_interested(),
                choked: pc.am_choking(),
            })
            .collect()
    }

    fn rechoke(&mut self, now: Instant) {
        let ranks = self.choker_ranks();
        let decision = if self.progress.is_seed() {
            self.seed_choker.rechoke(&ranks)
        } else {
            self.leech_choker.rechoke(&ranks)
        };
        tracing::debug!(
            "rechoke: {} unchoked, {} choked",
            decision.unchoke.len(),
            decision.choke.len(),
        );
        self.apply_rechoke(decision, now);
    }

    fn apply_rechoke(&mut self, decision: Rechoke, now: Instant) {
        for handle in decision.unchoke {
            if let Some(pc) = self.peers.get_mut(handle) {
                pc.unchoke(now);
            }
            self.flush(handle, now);
        }
        for handle in decision.choke {
            if let Some(pc) = self.peers.get_mut(handle) {
                pc.choke(now);
            }
            self.flush(handle, now);
        }
    }

    fn rotate_optimistic(&mut self, now: Instant) {
        let ranks = self.choker_ranks();
        let mut rng = rand::thread_rng();
        let pick = if self.progress.is_seed() {
            self.seed_choker.rotate_optimistic(&ranks, &mut rng)
        } else {
            self.leech_choker.rotate_optimistic(&ranks, &mut rng)
        };
        if let Some(handle) = pick {
            tracing::debug!("optimistic unchoke of {}", handle);
            if let Some(pc) = self.peers.get_mut(handle) {
                pc.unchoke(now);
            }
            self.flush(handle, now);
        }
    }

    fn fill_stats(&self, stats: &mut TorrentStats) {
        stats.num_pieces = self.progress.num_pieces();
        stats.num_complete = self.progress.num_complete();
        stats.num_partial = (0..self.db.num_pieces())
            .filter(|&idx| {
                self.db
                    .piece(idx)
                    .map_or(false, |p| p.is_started() && !p.all_received())
            })
            .count();

        // Cleared, not reallocated: capacity only ever grows.
        stats.peers.clear();
        stats.drate = 0;
        stats.urate = 0;
        for (_, pc) in self.peers.iter() {
            let peer = pc.stats();
            stats.drate += peer.drate;
            stats.urate += peer.urate;
            stats.peers.push(peer);
        }
    }
}
