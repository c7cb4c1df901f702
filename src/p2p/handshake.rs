use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use super::PeerError;

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

// Fixed wire size: pstrlen + pstr + reserved + info-hash + peer id.
const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

pub struct Handshake {
    pub reserved:   [u8; 8],
    pub info_hash:  [u8; 20],
    pub peer_id:    [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, handshake: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(PROTOCOL.len() as u8);
        dst.extend_from_slice(&PROTOCOL);
        dst.extend_from_slice(&handshake.reserved);
        dst.extend_from_slice(&handshake.info_hash);
        dst.extend_from_slice(&handshake.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.is_empty() {
            return Ok(None);
        }

        // The first byte alone can condemn the stream, no need to wait for
        // the rest of a frame that can never be valid.
        if src[0] as usize != PROTOCOL.len() {
            return Err(PeerError::IncorrectProtocol);
        }
        if src.remaining() < HANDSHAKE_LEN {
            return Ok(None);
        }

        src.advance(1);
        let mut protocol = [0; 19];
        src.copy_to_slice(&mut protocol);
        if protocol != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake { reserved, info_hash, peer_id }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}
