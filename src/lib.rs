mod config;
mod block;
mod piece;
mod piecedb;
mod progress;
mod selector;
mod blacklist;
mod jobs;
mod timer;
mod stats;
mod transport;
mod choker;
mod p2p;
mod download;

// Blocks are requested in 16 KiB chunks.
const BLOCK_SIZE: usize = 0x4000;

// Largest wire frame we accept: one oversized block plus the piece header.
const MAX_MESSAGE_LEN: usize = (1 << 17) + 13;

pub type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

pub use block::{BlockData, BlockInfo};
pub use config::{Config, ConfigError};
pub use download::{DownloadError, DownloadManager};
pub use p2p::ConnState;
pub use piece::Piece;
pub use piecedb::{MemoryPieceDb, PieceDb, PieceDbError};
pub use selector::{PieceSelector, RandomSelector, RarestFirstSelector, SequentialSelector};
pub use stats::{PeerStats, TorrentStats};
pub use transport::{NetHandle, Transport, TransportError};
