use crate::Bitfield;

// The set of pieces we have locally verified. Source of the outbound
// BITFIELD and of every "do we still need this piece" decision.
#[derive(Debug)]
pub struct PieceProgress {

    have: Bitfield,

    num_complete: usize,

}

impl PieceProgress {

    pub fn new(num_pieces: usize) -> PieceProgress {
        PieceProgress {
            have: Bitfield::repeat(false, num_pieces),
            num_complete: 0,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.have.len()
    }

    pub fn num_complete(&self) -> usize {
        self.num_complete
    }

    pub fn have_piece(&self, idx: usize) -> bool {
        self.have.get(idx).map_or(false, |b| *b)
    }

    // Idempotent, returns whether the piece was newly marked.
    pub fn mark_complete(&mut self, idx: usize) -> bool {
        debug_assert!(idx < self.have.len());
        if self.have[idx] {
            return false;
        }
        self.have.set(idx, true);
        self.num_complete += 1;
        true
    }

    pub fn is_seed(&self) -> bool {
        self.num_complete == self.have.len()
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.have
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_complete_idempotent() {
        let mut progress = PieceProgress::new(4);
        assert!(progress.mark_complete(2));
        assert!(!progress.mark_complete(2));
        assert_eq!(progress.num_complete(), 1);
        assert!(progress.have_piece(2));
        assert!(!progress.have_piece(0));
    }

    #[test]
    fn test_seed() {
        let mut progress = PieceProgress::new(2);
        assert!(!progress.is_seed());
        progress.mark_complete(0);
        progress.mark_complete(1);
        assert!(progress.is_seed());
    }

    #[test]
    fn test_empty_torrent_is_seed() {
        assert!(PieceProgress::new(0).is_seed());
    }
}
