use std::collections::HashMap;
use crate::{transport::NetHandle, Bitfield};

mod random;
mod rarest;
mod sequential;

pub use random::RandomSelector;
pub use rarest::RarestFirstSelector;
pub use sequential::SequentialSelector;

// Decides which piece a peer should fetch next. Pure indexing structure,
// mutated only from the manager's tick; strategies never touch I/O.
pub trait PieceSelector {

    fn add_peer(&mut self, peer: NetHandle);

    fn remove_peer(&mut self, peer: NetHandle);

    // We verified this piece, never offer it again.
    fn have_piece(&mut self, idx: usize);

    fn peer_have_piece(&mut self, peer: NetHandle, idx: usize);

    // A picked piece fell through (peer choked us or left), make it
    // pickable again.
    fn peer_giveback_piece(&mut self, peer: NetHandle, idx: usize);

    // Next piece to request from this peer, marked as picked.
    fn poll_piece(&mut self, peer: NetHandle) -> Option<usize>;

}

// Bookkeeping shared by every strategy: per-peer availability, the pieces
// we own, and the pieces currently out with some peer.
#[derive(Debug)]
pub(crate) struct SelectorCore {

    // How many connected peers advertise each piece.
    availability: Vec<usize>,

    have: Bitfield,

    // Picked but not yet completed.
    pending: Bitfield,

    peers: HashMap<NetHandle, Bitfield>,

}

impl SelectorCore {

    pub fn new(num_pieces: usize) -> SelectorCore {
        SelectorCore {
            availability: vec![0; num_pieces],
            have: Bitfield::repeat(false, num_pieces),
            pending: Bitfield::repeat(false, num_pieces),
            peers: HashMap::new(),
        }
    }

    pub fn availability(&self, idx: usize) -> usize {
        self.availability[idx]
    }

    pub fn add_peer(&mut self, peer: NetHandle) {
        self.peers
            .entry(peer)
            .or_insert_with(|| Bitfield::repeat(false, self.availability.len()));
    }

    pub fn remove_peer(&mut self, peer: NetHandle) {
        if let Some(bf) = self.peers.remove(&peer) {
            for idx in bf.iter_ones() {
                self.availability[idx] -= 1;
            }
        }
    }

    pub fn have_piece(&mut self, idx: usize) {
        debug_assert!(idx < self.have.len());
        self.have.set(idx, true);
        self.pending.set(idx, false);
    }

    pub fn peer_have_piece(&mut self, peer: NetHandle, idx: usize) {
        if idx >= self.availability.len() {
            return;
        }
        let bf = match self.peers.get_mut(&peer) {
            Some(bf) => bf,
            None => return,
        };
        // Double counting would skew rarest-first ordering.
        if !bf[idx] {
            bf.set(idx, true);
            self.availability[idx] += 1;
        }
    }

    pub fn giveback(&mut self, idx: usize) {
        if idx < self.pending.len() && !self.have[idx] {
            self.pending.set(idx, false);
        }
    }

    pub fn mark_pending(&mut self, idx: usize) {
        self.pending.set(idx, true);
    }

    // A piece is eligible for a peer if it has it, we lack it, and nobody
    // is already on it.
    pub fn eligible<'a>(&'a self, peer: NetHandle) -> impl Iterator<Item = usize> + 'a {
        let bf = self.peers.get(&peer);
        (0..self.availability.len()).filter(move |&idx| {
            bf.map_or(false, |bf| bf[idx]) && !self.have[idx] && !self.pending[idx]
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn handle(n: u32) -> NetHandle {
        NetHandle(n)
    }

    // Exercises the contract every strategy must uphold.
    pub fn check_selector_contract(selector: &mut dyn PieceSelector) {
        let peer = handle(1);
        selector.add_peer(peer);

        // Nothing advertised yet.
        assert_eq!(selector.poll_piece(peer), None);

        selector.peer_have_piece(peer, 2);
        let picked = selector.poll_piece(peer).unwrap();
        assert_eq!(picked, 2);

        // Picked pieces are not offered twice.
        assert_eq!(selector.poll_piece(peer), None);

        // Giveback makes it pickable again.
        selector.peer_giveback_piece(peer, 2);
        assert_eq!(selector.poll_piece(peer), Some(2));

        // Once we have it, it is gone for good.
        selector.have_piece(2);
        selector.peer_giveback_piece(peer, 2);
        assert_eq!(selector.poll_piece(peer), None);
    }

    #[test]
    fn test_availability_counts() {
        let mut core = SelectorCore::new(4);
        core.add_peer(handle(1));
        core.add_peer(handle(2));
        core.peer_have_piece(handle(1), 0);
        core.peer_have_piece(handle(2), 0);
        core.peer_have_piece(handle(2), 0);
        core.peer_have_piece(handle(2), 3);
        assert_eq!(core.availability(0), 2);
        assert_eq!(core.availability(3), 1);

        core.remove_peer(handle(2));
        assert_eq!(core.availability(0), 1);
        assert_eq!(core.availability(3), 0);
    }
}
