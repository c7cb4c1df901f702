use std::{collections::HashSet, net::SocketAddr};
use sha1::{Digest, Sha1};
use crate::block::{block_len, num_blocks, BlockInfo};

// States a block moves through while its piece downloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {

    #[default]
    Missing,

    // Asked of some peer, response outstanding.
    Requested,

    Received,

}

#[derive(Debug)]
pub struct Piece {

    pub idx: usize,

    // Length in bytes, only the final piece of a torrent may be short.
    pub len: usize,

    // Expected SHA-1 of the piece data, from the metainfo.
    pub hash: [u8; 20],

    blocks: Vec<BlockState>,

    // Peers that supplied at least one block of the current attempt.
    contributors: HashSet<SocketAddr>,

}

impl Piece {

    pub fn new(idx: usize, len: usize, hash: [u8; 20]) -> Piece {
        Piece {
            idx,
            len,
            hash,
            blocks: vec![BlockState::default(); num_blocks(len)],
            contributors: HashSet::new(),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    // Next missing block, marked requested. None once every block is out or in.
    pub fn poll_block_request(&mut self) -> Option<BlockInfo> {
        for (i, state) in self.blocks.iter_mut().enumerate() {
            if *state == BlockState::Missing {
                *state = BlockState::Requested;
                return Some(BlockInfo {
                    piece_idx: self.idx,
                    offset: i * crate::BLOCK_SIZE,
                    len: block_len(self.len, i),
                });
            }
        }
        None
    }

    // Return an unanswered request so another peer can pick it up.
    pub fn giveback_block(&mut self, block: &BlockInfo) {
        debug_assert_eq!(block.piece_idx, self.idx);
        let state = &mut self.blocks[block.idx_in_piece()];
        if *state == BlockState::Requested {
            *state = BlockState::Missing;
        }
    }

    // Record a delivered block and who sent it. Returns false for duplicates.
    pub fn mark_received(&mut self, block: &BlockInfo, from: SocketAddr) -> bool {
        debug_assert_eq!(block.piece_idx, self.idx);
        let state = &mut self.blocks[block.idx_in_piece()];
        if *state == BlockState::Received {
            return false;
        }
        *state = BlockState::Received;
        self.contributors.insert(from);
        true
    }

    pub fn block_received(&self, block: &BlockInfo) -> bool {
        self.blocks[block.idx_in_piece()] == BlockState::Received
    }

    pub fn all_received(&self) -> bool {
        self.blocks.iter().all(|s| *s == BlockState::Received)
    }

    pub fn fully_requested(&self) -> bool {
        self.blocks.iter().all(|s| *s != BlockState::Missing)
    }

    // Bytes received so far, counting the short tail block correctly.
    pub fn downloaded(&self) -> usize {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == BlockState::Received)
            .map(|(i, _)| block_len(self.len, i))
            .sum()
    }

    pub fn is_started(&self) -> bool {
        self.blocks.iter().any(|s| *s != BlockState::Missing)
    }

    pub fn contributors(&self) -> &HashSet<SocketAddr> {
        &self.contributors
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().as_slice() == self.hash
    }

    // Throw the attempt away after a failed verification. Yields the
    // contributors so the caller can hold them to account.
    pub fn reset(&mut self) -> Vec<SocketAddr> {
        self.blocks.iter_mut().for_each(|s| *s = BlockState::Missing);
        self.contributors.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_poll_covers_piece() {
        let mut piece = Piece::new(3, BLOCK_SIZE * 2 + 100, [0; 20]);
        let a = piece.poll_block_request().unwrap();
        let b = piece.poll_block_request().unwrap();
        let c = piece.poll_block_request().unwrap();
        assert_eq!((a.offset, a.len), (0, BLOCK_SIZE));
        assert_eq!((b.offset, b.len), (BLOCK_SIZE, BLOCK_SIZE));
        assert_eq!((c.offset, c.len), (BLOCK_SIZE * 2, 100));
        assert!(piece.poll_block_request().is_none());
        assert!(piece.fully_requested());
    }

    #[test]
    fn test_poll_then_giveback_is_a_noop() {
        let mut piece = Piece::new(0, BLOCK_SIZE * 4, [0; 20]);
        let block = piece.poll_block_request().unwrap();
        piece.giveback_block(&block);
        // The same block comes straight back out.
        assert_eq!(piece.poll_block_request(), Some(block));
    }

    #[test]
    fn test_duplicate_block_detected() {
        let mut piece = Piece::new(0, BLOCK_SIZE, [0; 20]);
        let block = piece.poll_block_request().unwrap();
        assert!(piece.mark_received(&block, addr(1)));
        assert!(!piece.mark_received(&block, addr(2)));
        assert_eq!(piece.contributors().len(), 1);
        assert!(piece.all_received());
        assert_eq!(piece.downloaded(), BLOCK_SIZE);
    }

    #[test]
    fn test_reset_drains_contributors() {
        let mut piece = Piece::new(0, BLOCK_SIZE * 2, [0; 20]);
        let a = piece.poll_block_request().unwrap();
        let b = piece.poll_block_request().unwrap();
        piece.mark_received(&a, addr(1));
        piece.mark_received(&b, addr(2));
        let mut blamed = piece.reset();
        blamed.sort();
        assert_eq!(blamed, vec![addr(1), addr(2)]);
        assert!(!piece.is_started());
        assert!(piece.contributors().is_empty());
    }

    #[test]
    fn test_verify() {
        // SHA-1 of the ASCII bytes "swarm".
        let hash = hex_literal::hex!("5c860f3e020d6df9826bc1e6be7bf0c82b81ced1");
        let piece = Piece::new(0, 5, hash);
        assert!(piece.verify(b"swarm"));
        assert!(!piece.verify(b"swarn"));
    }
}
