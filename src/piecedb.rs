use crate::{
    block::{BlockData, BlockInfo},
    piece::Piece,
    Bitfield,
};

#[derive(Debug, thiserror::Error)]
pub enum PieceDbError {

    #[error("piece {0} not in db")]
    UnknownPiece(usize),

    #[error("block {piece_idx}+{offset} out of piece bounds")]
    OutOfBounds { piece_idx: usize, offset: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PieceDbError>;

// Storage capability the download manager drives. Implementations persist
// block data and hand whole pieces back for verification; the manager owns
// all request bookkeeping through the `Piece` values the db stores.
pub trait PieceDb {

    fn num_pieces(&self) -> usize;

    fn piece(&self, idx: usize) -> Option<&Piece>;

    fn piece_mut(&mut self, idx: usize) -> Option<&mut Piece>;

    fn write_block(&mut self, block: &BlockData) -> Result<()>;

    fn read_block(&mut self, block: &BlockInfo) -> Result<Vec<u8>>;

    // Full piece data, read back for hash verification.
    fn piece_data(&mut self, idx: usize) -> Result<Vec<u8>>;

    // First piece the remote bitfield offers that we have not completed.
    fn poll_best_from_bitfield(&self, bf: &Bitfield) -> Option<usize> {
        (0..self.num_pieces())
            .filter(|&idx| bf.get(idx).map_or(false, |b| *b))
            .find(|&idx| self.piece(idx).map_or(false, |p| !p.all_received()))
    }
}

// RAM-backed piece store. Serves the tests and hosts that buffer a whole
// torrent in memory; disk stores implement the same trait on the host side.
#[derive(Debug, Default)]
pub struct MemoryPieceDb {

    piece_length: usize,

    // Total torrent size, determines the length of the final piece.
    total_size: usize,

    pieces: Vec<Piece>,

    data: Vec<Vec<u8>>,

}

impl MemoryPieceDb {

    pub fn new() -> MemoryPieceDb {
        MemoryPieceDb::default()
    }

    pub fn with_layout(piece_length: usize, total_size: usize) -> MemoryPieceDb {
        MemoryPieceDb {
            piece_length,
            total_size,
            ..MemoryPieceDb::default()
        }
    }

    pub fn set_piece_length(&mut self, len: usize) {
        self.piece_length = len;
    }

    pub fn set_total_size(&mut self, size: usize) {
        self.total_size = size;
    }

    // Append the next piece of the torrent. Its length is the configured
    // piece length, clipped by whatever remains of the total size.
    pub fn add_piece(&mut self, hash: [u8; 20]) -> usize {
        let idx = self.pieces.len();
        let consumed = idx * self.piece_length;
        let len = if self.total_size > 0 {
            self.piece_length.min(self.total_size - consumed)
        } else {
            self.piece_length
        };
        self.pieces.push(Piece::new(idx, len, hash));
        self.data.push(vec![0; len]);
        idx
    }

    pub fn from_hashes(
        piece_length: usize,
        total_size: usize,
        hashes: impl IntoIterator<Item = [u8; 20]>,
    ) -> MemoryPieceDb {
        let mut db = MemoryPieceDb::with_layout(piece_length, total_size);
        for hash in hashes {
            db.add_piece(hash);
        }
        db
    }

    fn slice(&self, idx: usize, offset: usize, len: usize) -> Result<&[u8]> {
        let piece = self.pieces.get(idx).ok_or(PieceDbError::UnknownPiece(idx))?;
        if offset + len > piece.len {
            return Err(PieceDbError::OutOfBounds { piece_idx: idx, offset });
        }
        Ok(&self.data[idx][offset..offset + len])
    }
}

impl PieceDb for MemoryPieceDb {

    fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    fn piece(&self, idx: usize) -> Option<&Piece> {
        self.pieces.get(idx)
    }

    fn piece_mut(&mut self, idx: usize) -> Option<&mut Piece> {
        self.pieces.get_mut(idx)
    }

    fn write_block(&mut self, block: &BlockData) -> Result<()> {
        let idx = block.piece_idx;
        let piece = self.pieces.get(idx).ok_or(PieceDbError::UnknownPiece(idx))?;
        if block.offset + block.data.len() > piece.len {
            return Err(PieceDbError::OutOfBounds { piece_idx: idx, offset: block.offset });
        }
        self.data[idx][block.offset..block.offset + block.data.len()]
            .copy_from_slice(&block.data);
        Ok(())
    }

    fn read_block(&mut self, block: &BlockInfo) -> Result<Vec<u8>> {
        self.slice(block.piece_idx, block.offset, block.len).map(<[u8]>::to_vec)
    }

    fn piece_data(&mut self, idx: usize) -> Result<Vec<u8>> {
        let piece = self.pieces.get(idx).ok_or(PieceDbError::UnknownPiece(idx))?;
        self.slice(idx, 0, piece.len).map(<[u8]>::to_vec)
    }
}
