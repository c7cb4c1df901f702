use rand::Rng;
use crate::transport::NetHandle;
use super::{PieceSelector, SelectorCore};

// Picks uniformly among eligible pieces. Decorrelates a fresh swarm where
// every peer would otherwise pile onto the same first pieces.
#[derive(Debug)]
pub struct RandomSelector {
    core: SelectorCore,
}

impl RandomSelector {
    pub fn new(num_pieces: usize) -> RandomSelector {
        RandomSelector { core: SelectorCore::new(num_pieces) }
    }
}

impl PieceSelector for RandomSelector {

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

    fn poll_piece(&mut self, peer: NetHandle) -> Option<usize> {
        let eligible: Vec<usize> = self.core.eligible(peer).collect();
        if eligible.is_empty() {
            return None;
        }
        let idx = eligible[rand::thread_rng().gen_range(0..eligible.len())];
        self.core.mark_pending(idx);
        Some(idx)
    }
}
