use std::{
    collections::HashSet,
    net::SocketAddr,
    time::{Duration, Instant},
};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use crate::{
    block::{BlockData, BlockInfo},
    config::Config,
    progress::PieceProgress,
    stats::{PeerStats, ThroughputStats},
    Bitfield,
};
use super::{
    handshake::{Handshake, HandshakeCodec},
    message::{Message, MessageCodec},
    PeerError, PeerEvent, Result,
};

// Drop a peer that has sent nothing for this long.
const RX_TIMEOUT: Duration = Duration::from_secs(120);

// Send-side idle time before a keep-alive goes out.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {

    // Outbound connect handed to the transport, completion pending.
    Connecting,

    // Transport is up, handshakes not yet exchanged.
    Handshaking,

    // Handshake done; the one-message window in which a bitfield is legal.
    Introducing,

    Connected,

    // Terminal. The transport refused a connect or send.
    Failed,

}

// Per-peer protocol state machine. Sans-IO: inbound bytes are pushed in by
// the manager, outbound messages accumulate in an internal buffer, and
// everything that needs shared state is raised as a PeerEvent for the
// manager to act on.
#[derive(Debug)]
pub struct PeerConnection {

    address: SocketAddr,

    state: ConnState,

    handshake_sent: bool,

    // Whether we are serving the peer's requests. Starts choked.
    choked: bool,

    // Whether we want the peer's pieces.
    interested: bool,

    peer_choking: bool,

    peer_interested: bool,

    // Remote id, learned from the handshake.
    remote_id: Option<[u8; 20]>,

    // Pieces the remote advertised.
    bitfield: Bitfield,

    // Requests we sent that are still unanswered.
    pending: HashSet<BlockInfo>,

    // Requests the peer sent that we have not yet served.
    requests_in: HashSet<BlockInfo>,

    throughput: ThroughputStats,

    last_rx: Instant,

    last_tx: Instant,

    last_tick: Instant,

    info_hash: [u8; 20],

    client_id: [u8; 20],

    num_pieces: usize,

    piece_length: usize,

    max_pending: usize,

    in_buf: BytesMut,

    out_buf: BytesMut,

    events: Vec<PeerEvent>,

}

impl PeerConnection {

    pub fn new(address: SocketAddr, config: &Config, outbound: bool, now: Instant) -> PeerConnection {
        PeerConnection {
            address,
            state: if outbound { ConnState::Connecting } else { ConnState::Handshaking },
            handshake_sent: false,
            choked: true,
            interested: false,
            peer_choking: true,
            peer_interested: false,
            remote_id: None,
            bitfield: Bitfield::repeat(false, config.num_pieces),
            pending: HashSet::new(),
            requests_in: HashSet::new(),
            throughput: ThroughputStats::default(),
            last_rx: now,
            last_tx: now,
            last_tick: now,
            info_hash: config.info_hash,
            client_id: config.client_id,
            num_pieces: config.num_pieces,
            piece_length: config.piece_length,
            max_pending: config.max_pending_requests,
            in_buf: BytesMut::new(),
            out_buf: BytesMut::new(),
            events: Vec::new(),
        }
    }

    // Outbound connect completed, open with our handshake.
    pub fn on_connect(&mut self, now: Instant) {
        if self.state != ConnState::Connecting {
            return;
        }
        tracing::trace!("outbound connection to {} up", self.address);
        self.state = ConnState::Handshaking;
        self.push_handshake(now);
    }

    pub fn on_connect_fail(&mut self) {
        tracing::warn!("connect to {} failed", self.address);
        self.state = ConnState::Failed;
    }

    pub fn mark_failed(&mut self) {
        self.state = ConnState::Failed;
    }

    // Feed raw bytes off the wire. Frames may arrive in any fragmentation;
    // whole messages are handled, the rest buffers until the next call.
    pub fn handle_bytes(
        &mut self,
        data: &[u8],
        progress: &PieceProgress,
        now: Instant,
    ) -> Result<()> {
        self.last_rx = now;
        self.in_buf.extend_from_slice(data);

        if !self.handshake_received() {
            match HandshakeCodec.decode(&mut self.in_buf)? {
                None => return Ok(()),
                Some(handshake) => self.handle_handshake(handshake, progress, now)?,
            }
        }

        while let Some(msg) = MessageCodec.decode(&mut self.in_buf)? {
            self.handle_msg(msg, progress, now)?;
        }
        Ok(())
    }

    fn handle_handshake(
        &mut self,
        handshake: Handshake,
        progress: &PieceProgress,
        now: Instant,
    ) -> Result<()> {
        if handshake.info_hash != self.info_hash {
            tracing::error!("{} sent a foreign info-hash", self.address);
            return Err(PeerError::IncorrectInfoHash);
        }
        tracing::info!("handshake from {:?} at {}", handshake, self.address);
        self.remote_id = Some(handshake.peer_id);

        // Inbound peers spoke first, answer in kind.
        if !self.handshake_sent {
            self.push_handshake(now);
        }
        self.state = ConnState::Introducing;
        self.push_msg(now, Message::Bitfield(progress.bitfield().clone()));
        Ok(())
    }

    fn handle_msg(&mut self, msg: Message, progress: &PieceProgress, now: Instant) -> Result<()> {
        tracing::trace!("read from {}: {}", self.address, msg);

        // The bitfield window closes on whatever message arrives first.
        let introducing = self.state == ConnState::Introducing;
        if introducing {
            self.state = ConnState::Connected;
        }

        match msg {

            Message::KeepAlive => {},

            Message::Bitfield(bitfield) => {
                if !introducing {
                    tracing::error!("unexpected bitfield from {}", self.address);
                    return Err(PeerError::UnexpectedBitfield);
                }
                self.handle_bitfield(bitfield, progress, now);
            },

            Message::Choke => {
                if !self.peer_choking {
                    self.peer_choking = true;
                    // Give outstanding requests back for other peers.
                    let returned: Vec<BlockInfo> = self.pending.drain().collect();
                    if !returned.is_empty() {
                        self.events.push(PeerEvent::Giveback(returned));
                    }
                }
            },

            Message::Unchoke => {
                if self.peer_choking {
                    self.peer_choking = false;
                    self.events.push(PeerEvent::PollBlocks);
                }
            },

            Message::Interested => self.peer_interested = true,

            Message::NotInterested => self.peer_interested = false,

            Message::Have { idx } => self.handle_have(idx as usize, progress, now)?,

            Message::Request(request) => self.handle_request(request)?,

            Message::Block(block) => {
                let info = block.info();
                if self.pending.remove(&info) {
                    self.throughput.down += info.len as u64;
                    self.events.push(PeerEvent::BlockIn(block));
                    self.events.push(PeerEvent::PollBlocks);
                } else {
                    tracing::warn!("unrequested block from {}: {:?}", self.address, info);
                }
            },

            Message::Cancel(request) => {
                self.requests_in.remove(&request);
            },
        }

        Ok(())
    }

    fn handle_bitfield(&mut self, mut bitfield: Bitfield, progress: &PieceProgress, now: Instant) {
        // Trailing pad bits fall off here.
        bitfield.resize(self.num_pieces, false);
        tracing::info!(
            "{} has {}/{} pieces",
            self.address,
            bitfield.count_ones(),
            self.num_pieces,
        );

        let mut wanted = false;
        for idx in bitfield.iter_ones() {
            self.events.push(PeerEvent::PeerHas(idx));
            if !progress.have_piece(idx) {
                wanted = true;
            }
        }
        self.bitfield = bitfield;
        if wanted {
            self.declare_interest(now);
        }
    }

    fn handle_have(&mut self, idx: usize, progress: &PieceProgress, now: Instant) -> Result<()> {
        if idx >= self.num_pieces {
            tracing::error!("have from {} with invalid idx {}", self.address, idx);
            return Err(PeerError::InvalidMessage);
        }
        if self.bitfield[idx] {
            return Ok(());
        }
        self.bitfield.set(idx, true);
        self.events.push(PeerEvent::PeerHas(idx));
        if !progress.have_piece(idx) {
            self.declare_interest(now);
        }
        Ok(())
    }

    fn handle_request(&mut self, request: BlockInfo) -> Result<()> {
        if self.choked {
            // Either a stale request racing our choke or a rude peer.
            tracing::debug!("request from {} while choked, ignored", self.address);
            return Ok(());
        }
        if !request.is_valid(self.num_pieces, self.piece_length) {
            tracing::error!("invalid request from {}: {:?}", self.address, request);
            return Err(PeerError::InvalidMessage);
        }
        if self.requests_in.insert(request) {
            self.events.push(PeerEvent::BlockOut(request));
        }
        Ok(())
    }

    // One tick of housekeeping: rates, timeout, keep-alive, pipeline refill.
    pub fn periodic(&mut self, now: Instant) -> Result<()> {
        if self.state == ConnState::Failed {
            return Ok(());
        }

        let dt = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.throughput.tick(dt);
        self.last_tick = now;

        if now.saturating_duration_since(self.last_rx) > RX_TIMEOUT {
            tracing::warn!("{} timed out", self.address);
            return Err(PeerError::Timeout);
        }

        if self.handshake_received()
            && now.saturating_duration_since(self.last_tx) >= KEEP_ALIVE_INTERVAL
        {
            self.push_msg(now, Message::KeepAlive);
        }

        if self.ready_for_requests() && self.has_pipeline_room() {
            self.events.push(PeerEvent::PollBlocks);
        }
        Ok(())
    }

    // Queue a request to the peer. The caller polls room beforehand.
    pub fn request_block(&mut self, now: Instant, block: BlockInfo) {
        debug_assert!(self.pending.len() < self.max_pending);
        if self.pending.insert(block) {
            self.push_msg(now, Message::Request(block));
        }
    }

    // Serve a block the manager read from storage.
    pub fn serve_block(&mut self, now: Instant, block: BlockData) {
        let info = block.info();
        if !self.requests_in.remove(&info) {
            // The peer cancelled, or choked in between read and serve.
            tracing::debug!("block read but no live request from {}: {:?}", self.address, info);
            return;
        }
        self.throughput.up += info.len as u64;
        self.push_msg(now, Message::Block(block));
    }

    pub fn send_have(&mut self, now: Instant, idx: usize) {
        self.push_msg(now, Message::Have { idx: idx as u32 });
    }

    pub fn choke(&mut self, now: Instant) {
        if !self.choked {
            self.choked = true;
            self.requests_in.clear();
            self.push_msg(now, Message::Choke);
        }
    }

    pub fn unchoke(&mut self, now: Instant) {
        if self.choked {
            self.choked = false;
            self.push_msg(now, Message::Unchoke);
        }
    }

    fn declare_interest(&mut self, now: Instant) {
        if !self.interested {
            self.interested = true;
            self.push_msg(now, Message::Interested);
        }
    }

    fn push_handshake(&mut self, now: Instant) {
        let handshake = Handshake::new(self.info_hash, self.client_id);
        // Writing into a BytesMut cannot fail.
        let _ = HandshakeCodec.encode(handshake, &mut self.out_buf);
        self.handshake_sent = true;
        self.last_tx = now;
    }

    fn push_msg(&mut self, now: Instant, msg: Message) {
        tracing::trace!("send to {}: {}", self.address, msg);
        let _ = MessageCodec.encode(msg, &mut self.out_buf);
        self.last_tx = now;
    }

    // Everything queued for the wire since the last call.
    pub fn take_outgoing(&mut self) -> Option<BytesMut> {
        if self.out_buf.is_empty() {
            None
        } else {
            Some(self.out_buf.split())
        }
    }

    pub fn take_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.events)
    }

    // Drain outstanding requests, used when the peer goes away.
    pub fn giveback_all(&mut self) -> Vec<BlockInfo> {
        self.pending.drain().collect()
    }

    // Distinct pieces this peer has requests in flight for.
    pub fn pending_pieces(&self) -> Vec<usize> {
        let mut pieces: Vec<usize> = self.pending.iter().map(|b| b.piece_idx).collect();
        pieces.sort_unstable();
        pieces.dedup();
        pieces
    }

    pub fn has_pipeline_room(&self) -> bool {
        self.pending.len() < self.max_pending
    }

    pub fn ready_for_requests(&self) -> bool {
        self.handshake_received() && !self.peer_choking
    }

    pub fn handshake_received(&self) -> bool {
        matches!(self.state, ConnState::Introducing | ConnState::Connected)
    }

    pub fn is_failed(&self) -> bool {
        self.state == ConnState::Failed
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn remote_id(&self) -> Option<[u8; 20]> {
        self.remote_id
    }

    pub fn am_choking(&self) -> bool {
        self.choked
    }

    pub fn is_interested(&self) -> bool {
        self.interested
    }

    pub fn peer_choking(&self) -> bool {
        self.peer_choking
    }

    pub fn peer_interested(&self) -> bool {
        self.peer_interested
    }

    pub fn drate(&self) -> u64 {
        self.throughput.down.rate()
    }

    pub fn urate(&self) -> u64 {
        self.throughput.up.rate()
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            address: self.address,
            state: self.state,
            choked: self.choked,
            interested: self.interested,
            peer_choking: self.peer_choking,
            peer_interested: self.peer_interested,
            drate: self.throughput.down.rate(),
            urate: self.throughput.up.rate(),
            downloaded: self.throughput.down.total(),
            uploaded: self.throughput.up.total(),
            num_pieces: self.bitfield.count_ones(),
        }
    }
}
