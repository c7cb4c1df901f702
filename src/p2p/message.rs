use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::{
    block::{BlockData, BlockInfo},
    Bitfield, MAX_MESSAGE_LEN,
};
use super::PeerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // Advises the peer not to close an otherwise silent connection.
    KeepAlive,

    // No further requests will be served.
    Choke,

    // Requests from the peer will be served again.
    Unchoke,

    // We want to request blocks from the peer.
    Interested,

    NotInterested,

    // The sender acquired the piece at this index.
    Have { idx: u32 },

    // Everything the sender has, only valid directly after the handshake.
    Bitfield(Bitfield),

    Request(BlockInfo),

    // A block of piece data.
    Block(BlockData),

    // Withdraw an earlier request.
    Cancel(BlockInfo),

}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {

            // <len=0000>
            Message::KeepAlive => dst.put_u32(0),

            // <len=0001><id=0>
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            },

            // <len=0001><id=1>
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            },

            // <len=0001><id=2>
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            },

            // <len=0001><id=3>
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            },

            // <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(idx);
            },

            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            },

            // <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(6);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },

            // <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            },

            // <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(8);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.remaining() < 4 {
            return Ok(None);
        }

        let mut peeker = std::io::Cursor::new(&src[..]);
        let msg_len = peeker.get_u32() as usize;

        // A hostile length prefix would otherwise make us buffer without bound.
        if msg_len > MAX_MESSAGE_LEN {
            return Err(PeerError::OversizedMessage(msg_len));
        }

        if src.remaining() < 4 + msg_len {
            return Ok(None);
        }
        src.advance(4);
        if msg_len == 0 {
            return Ok(Some(Message::KeepAlive));
        }

        let msg = match (src.get_u8(), msg_len) {
            (0, 1) => Message::Choke,
            (1, 1) => Message::Unchoke,
            (2, 1) => Message::Interested,
            (3, 1) => Message::NotInterested,
            (4, 5) => Message::Have { idx: src.get_u32() },
            (5, _) => {
                let mut bitfield = vec![0; msg_len - 1];
                src.copy_to_slice(&mut bitfield);
                Message::Bitfield(Bitfield::from_vec(bitfield))
            },
            (6, 13) => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let len = src.get_u32() as usize;
                Message::Request(BlockInfo { piece_idx, offset, len })
            },
            (7, n) if n >= 9 => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let mut data = vec![0; msg_len - 9];
                src.copy_to_slice(&mut data);
                Message::Block(BlockData { piece_idx, offset, data })
            },
            (8, 13) => {
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let len = src.get_u32() as usize;
                Message::Cancel(BlockInfo { piece_idx, offset, len })
            },
            (id, len) => {
                if matches!(id, 0..=8) {
                    tracing::warn!("message id {} with bad length {}", id, len);
                    return Err(PeerError::InvalidMessage);
                }
                tracing::warn!("invalid message id: {}", id);
                return Err(PeerError::InvalidMessageId(id));
            }
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(f, "request {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
            Message::Block(block) => write!(f, "block {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(block) => write!(f, "cancel {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_message() {
        let mut bitfield = Bitfield::repeat(false, 16);
        bitfield.set(3, true);
        bitfield.set(11, true);

        let messages = [
            Message::KeepAlive,
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have { idx: 0x0b },
            Message::Bitfield(bitfield),
            Message::Request(BlockInfo { piece_idx: 11, offset: 0x4000, len: 0x4000 }),
            Message::Block(BlockData { piece_idx: 11, offset: 0x4000, data: vec![1, 2, 3] }),
            Message::Cancel(BlockInfo { piece_idx: 11, offset: 0x4000, len: 0x4000 }),
        ];

        let mut buf = BytesMut::new();
        for msg in messages.iter().cloned() {
            MessageCodec.encode(msg, &mut buf).unwrap();
        }
        for expected in messages.iter() {
            let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&decoded, expected);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frames_buffer() {
        let mut buf = BytesMut::new();

        // Half a have message.
        buf.extend_from_slice(&[0, 0, 0, 5, 4, 0]);
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), None);

        // The rest arrives.
        buf.extend_from_slice(&[0, 0, 9]);
        assert_eq!(
            MessageCodec.decode(&mut buf).unwrap(),
            Some(Message::Have { idx: 9 })
        );
    }

    #[test]
    fn test_length_limit() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_MESSAGE_LEN + 1) as u32);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::OversizedMessage(_))
        ));
    }

    #[test]
    fn test_invalid_id() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 9][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::InvalidMessageId(9))
        ));
    }

    #[test]
    fn test_fixed_payload_length_checked() {
        // A choke with a stray payload byte.
        let mut buf = BytesMut::from(&[0u8, 0, 0, 2, 0, 0xff][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::InvalidMessage)
        ));
    }
}
