//! Length-prefixed framing and message decode/encode for everything sent
//! after the handshake.

use super::message::{Message, MessageId};
use crate::{error::DecodeError, Bitfield, BlockInfo};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The length of the 4-byte big-endian length prefix.
const LEN_PREFIX_LEN: usize = 4;

/// The length of the single-byte message id.
const ID_LEN: usize = 1;

/// `Request`/`Cancel` both carry `piece_index, begin, length` as three
/// big-endian u32s.
const BLOCK_INFO_PAYLOAD_LEN: usize = 3 * 4;

pub struct PeerCodec;

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = DecodeError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < LEN_PREFIX_LEN {
                return Ok(None);
            }

            let len = u32::from_be_bytes(src[0..LEN_PREFIX_LEN].try_into().unwrap())
                as usize;

            if len == 0 {
                // keep-alive: consume the prefix and report it
                src.advance(LEN_PREFIX_LEN);
                return Ok(Some(Message::KeepAlive));
            }

            if src.len() < LEN_PREFIX_LEN + len {
                src.reserve(LEN_PREFIX_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(LEN_PREFIX_LEN);
            let mut frame = src.split_to(len);
            let id = frame.get_u8();

            match MessageId::from_u8(id) {
                Some(MessageId::Choke) => return Ok(Some(Message::Choke)),
                Some(MessageId::Unchoke) => return Ok(Some(Message::Unchoke)),
                Some(MessageId::Interested) => {
                    return Ok(Some(Message::Interested))
                }
                Some(MessageId::NotInterested) => {
                    return Ok(Some(Message::NotInterested))
                }
                Some(MessageId::Have) => {
                    if frame.len() < 4 {
                        return Err(DecodeError::InvalidPayload {
                            id,
                            expected_at_least: 4,
                            got: frame.len(),
                        });
                    }
                    return Ok(Some(Message::Have {
                        piece_index: frame.get_u32(),
                    }));
                }
                Some(MessageId::Bitfield) => {
                    return Ok(Some(Message::Bitfield(Bitfield::from_vec(
                        frame.to_vec(),
                    ))));
                }
                Some(MessageId::Request) => {
                    return Ok(Some(Message::Request(
                        decode_block_info(id, &mut frame)?,
                    )));
                }
                Some(MessageId::Piece) => {
                    if frame.len() < 8 {
                        return Err(DecodeError::InvalidPayload {
                            id,
                            expected_at_least: 8,
                            got: frame.len(),
                        });
                    }
                    let piece_index = frame.get_u32();
                    let begin = frame.get_u32();
                    return Ok(Some(Message::Piece {
                        piece_index,
                        begin,
                        data: frame.to_vec(),
                    }));
                }
                Some(MessageId::Cancel) => {
                    return Ok(Some(Message::Cancel(decode_block_info(
                        id, &mut frame,
                    )?)));
                }
                Some(MessageId::Extended) => {
                    // opaque payload: parsed-length-correct (the frame was
                    // already split to its exact length) and discarded
                    return Ok(Some(Message::Extended(frame.to_vec())));
                }
                None => {
                    // unknown id: payload has already been consumed via
                    // `split_to` above, which keeps the stream aligned; loop
                    // back around in case another full frame is already
                    // buffered
                    continue;
                }
            }
        }
    }
}

fn decode_block_info(
    id: u8,
    frame: &mut BytesMut,
) -> Result<BlockInfo, DecodeError> {
    if frame.len() < BLOCK_INFO_PAYLOAD_LEN {
        return Err(DecodeError::InvalidPayload {
            id,
            expected_at_least: BLOCK_INFO_PAYLOAD_LEN,
            got: frame.len(),
        });
    }
    let piece_index = frame.get_u32() as crate::PieceIndex;
    let offset = frame.get_u32();
    let len = frame.get_u32();
    Ok(BlockInfo {
        piece_index,
        offset,
        len,
    })
}

impl Encoder<Message> for PeerCodec {
    type Error = std::io::Error;

    fn encode(
        &mut self,
        msg: Message,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match msg {
            Message::KeepAlive => {
                dst.put_u32(0);
            }
            Message::Choke => put_empty(dst, MessageId::Choke),
            Message::Unchoke => put_empty(dst, MessageId::Unchoke),
            Message::Interested => put_empty(dst, MessageId::Interested),
            Message::NotInterested => put_empty(dst, MessageId::NotInterested),
            Message::Have { piece_index } => {
                dst.put_u32(ID_LEN as u32 + 4);
                dst.put_u8(MessageId::Have as u8);
                dst.put_u32(piece_index);
            }
            Message::Bitfield(bitfield) => {
                let raw = bitfield.into_vec();
                dst.put_u32(ID_LEN as u32 + raw.len() as u32);
                dst.put_u8(MessageId::Bitfield as u8);
                dst.put(&raw[..]);
            }
            Message::Request(block) => {
                put_block_info(dst, MessageId::Request, &block)
            }
            Message::Piece {
                piece_index,
                begin,
                data,
            } => {
                dst.put_u32(ID_LEN as u32 + 8 + data.len() as u32);
                dst.put_u8(MessageId::Piece as u8);
                dst.put_u32(piece_index as u32);
                dst.put_u32(begin);
                dst.put(&data[..]);
            }
            Message::Cancel(block) => {
                put_block_info(dst, MessageId::Cancel, &block)
            }
            Message::Extended(payload) => {
                dst.put_u32(ID_LEN as u32 + payload.len() as u32);
                dst.put_u8(MessageId::Extended as u8);
                dst.put(&payload[..]);
            }
        }
        Ok(())
    }
}

fn put_empty(dst: &mut BytesMut, id: MessageId) {
    dst.put_u32(ID_LEN as u32);
    dst.put_u8(id as u8);
}

fn put_block_info(dst: &mut BytesMut, id: MessageId, block: &BlockInfo) {
    dst.put_u32(ID_LEN as u32 + BLOCK_INFO_PAYLOAD_LEN as u32);
    dst.put_u8(id as u8);
    dst.put_u32(block.piece_index as u32);
    dst.put_u32(block.offset);
    dst.put_u32(block.len);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let mut buf = BytesMut::new();
        let mut codec = PeerCodec;
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_round_trip_each_message() {
        round_trip(Message::KeepAlive);
        round_trip(Message::Choke);
        round_trip(Message::Unchoke);
        round_trip(Message::Interested);
        round_trip(Message::NotInterested);
        round_trip(Message::Have { piece_index: 7 });
        round_trip(Message::Bitfield(Bitfield::from_vec(vec![0b1010_0000])));
        round_trip(Message::Request(BlockInfo {
            piece_index: 1,
            offset: 16384,
            len: 16384,
        }));
        round_trip(Message::Piece {
            piece_index: 1,
            begin: 0,
            data: vec![1, 2, 3, 4],
        });
        round_trip(Message::Cancel(BlockInfo {
            piece_index: 1,
            offset: 0,
            len: 16384,
        }));
        round_trip(Message::Extended(vec![9, 9, 9]));
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(5); // declares 5 bytes to follow, only 1 byte buffered
        buf.put_u8(MessageId::Choke as u8);
        let mut codec = PeerCodec;
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_skips_unknown_id_and_stays_aligned() {
        let mut buf = BytesMut::new();
        // unknown id 99 with a 2-byte payload, followed by a real Unchoke
        buf.put_u32(3);
        buf.put_u8(99);
        buf.put_u8(0xAA);
        buf.put_u8(0xBB);
        buf.put_u32(1);
        buf.put_u8(MessageId::Unchoke as u8);

        let mut codec = PeerCodec;
        let decoded = codec.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(Message::Unchoke));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_request_rejects_short_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32(1 + 4); // too short for a Request's 3 u32s
        buf.put_u8(MessageId::Request as u8);
        buf.put_u32(0);
        let mut codec = PeerCodec;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::InvalidPayload { id: 6, .. })
        ));
    }
}
