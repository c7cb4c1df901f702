use crate::transport::NetHandle;
use super::{PieceSelector, SelectorCore};

/*
Rarest first keeps the swarm healthy: pieces held by the fewest peers are
fetched before common ones, so no piece dies out when its holders leave.
Availability comes from the initial bitfields and is kept current by every
have message.
*/

#[derive(Debug)]
pub struct RarestFirstSelector {
    core: SelectorCore,
}

impl RarestFirstSelector {
    pub fn new(num_pieces: usize) -> RarestFirstSelector {
        RarestFirstSelector { core: SelectorCore::new(num_pieces) }
    }
}

impl PieceSelector for RarestFirstSelector {

    fn add_peer(&mut self, peer: NetHandle) {
        self.core.add_peer(peer);
    }

    fn remove_peer(&mut self, peer: NetHandle) {
        self.core.remove_peer(peer);
    }

    fn have_piece(&mut self, idx: usize) {
        self.core.have_piece(idx);
    }

    fn peer_have_piece(&mut self, peer: NetHandle, idx: usize) {
        self.core.peer_have_piece(peer, idx);
    }

    fn peer_giveback_piece(&mut self, _peer: NetHandle, idx: usize) {
        self.core.giveback(idx);
    }

    // Lowest availability wins, ties fall to the lowest index.
    fn poll_piece(&mut self, peer: NetHandle) -> Option<usize> {
        let core = &self.core;
        let idx = core.eligible(peer).min_by_key(|&idx| core.availability(idx))?;
        self.core.mark_pending(idx);
        Some(idx)
    }
}
