use crate::block::{BlockData, BlockInfo};

mod handshake;
mod message;
mod connection;
mod manager;

pub use connection::{ConnState, PeerConnection};
pub use handshake::{Handshake, HandshakeCodec, PROTOCOL};
pub use manager::PeerManager;
pub use message::{Message, MessageCodec};

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    #[error("message of {0} bytes exceeds the frame limit")]
    OversizedMessage(usize),

    #[error("bitfield after the first message")]
    UnexpectedBitfield,

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("peer idle for too long")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

}

// What a connection asks the download manager to do on its behalf. The
// connection itself never touches the db, the selector, or other peers.
#[derive(Debug, PartialEq, Eq)]
pub enum PeerEvent {

    // The request pipeline has room; poll the selector.
    PollBlocks,

    // The peer delivered a block we asked for.
    BlockIn(BlockData),

    // The peer asked for a block and we are not choking it.
    BlockOut(BlockInfo),

    // The peer advertised a piece, via have or bitfield.
    PeerHas(usize),

    // Requests abandoned when the peer choked us.
    Giveback(Vec<BlockInfo>),

}
