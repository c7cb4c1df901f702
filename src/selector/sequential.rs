use crate::transport::NetHandle;
use super::{PieceSelector, SelectorCore};

// Picks eligible pieces in index order. Useful for streaming workloads
// where early bytes matter more than swarm health.
#[derive(Debug)]
pub struct SequentialSelector {
    core: SelectorCore,
}

impl SequentialSelector {
    pub fn new(num_pieces: usize) -> SequentialSelector {
        SequentialSelector { core: SelectorCore::new(num_pieces) }
    }
}

impl PieceSelector for SequentialSelector {

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
        let idx = self.core.eligible(peer).next()?;
        self.core.mark_pending(idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::tests::{check_selector_contract, handle};

    #[test]
    fn test_contract() {
        check_selector_contract(&mut SequentialSelector::new(8));
    }

    #[test]
    fn test_lowest_index_first() {
        let mut selector = SequentialSelector::new(4);
        let peer = handle(1);
        selector.add_peer(peer);
        for idx in [3, 1, 2] {
            selector.peer_have_piece(peer, idx);
        }
        assert_eq!(selector.poll_piece(peer), Some(1));
        assert_eq!(selector.poll_piece(peer), Some(2));
        assert_eq!(selector.poll_piece(peer), Some(3));
        assert_eq!(selector.poll_piece(peer), None);
    }
}
