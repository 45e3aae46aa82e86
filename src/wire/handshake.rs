//! The fixed 68-byte BitTorrent handshake frame.

use crate::{error::DecodeError, PeerId, Sha1Hash};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The protocol string advertised in every handshake.
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The length of `PROTOCOL_STRING`, the first byte of the handshake.
const PROTOCOL_STRING_LEN: u8 = 19;

/// The total length of a handshake frame on the wire.
const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// The BitTorrent handshake, exchanged once at the start of every peer
/// connection, in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
}

impl Handshake {
    /// Creates a new handshake with the reserved bytes zeroed, as mandated
    /// for a connection without protocol extensions.
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        Self {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

/// A `tokio_util::codec` codec for the handshake frame, used only for the
/// first message exchanged on a new connection; the socket is then
/// re-framed with [`PeerCodec`](super::PeerCodec) for everything after.
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = std::io::Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING_LEN);
        buf.put(PROTOCOL_STRING.as_bytes());
        buf.put(&handshake.reserved[..]);
        buf.put(&handshake.info_hash[..]);
        buf.put(&handshake.peer_id[..]);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = DecodeError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < HANDSHAKE_LEN {
            buf.reserve(HANDSHAKE_LEN - buf.len());
            return Ok(None);
        }

        let pstrlen = buf[0];
        if pstrlen != PROTOCOL_STRING_LEN {
            return Err(DecodeError::InvalidProtocolLength(pstrlen));
        }
        if &buf[1..20] != PROTOCOL_STRING.as_bytes() {
            return Err(DecodeError::InvalidProtocolString);
        }

        let mut buf = buf.split_to(HANDSHAKE_LEN);
        buf.advance(20); // pstrlen + pstr

        let mut reserved = [0u8; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0u8; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0u8; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_round_trip() {
        let info_hash: Sha1Hash = {
            let mut h = [0u8; 20];
            for (i, b) in h.iter_mut().enumerate() {
                *b = i as u8 + 1;
            }
            h
        };
        let peer_id = *b"PPPPPPPPPPPPPPPPPPPP";
        let handshake = Handshake::new(info_hash, peer_id);

        let mut buf = BytesMut::new();
        let mut codec = HandshakeCodec;
        codec.encode(handshake, &mut buf).unwrap();
        assert_eq!(buf.len(), HANDSHAKE_LEN);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, handshake);
    }

    #[test]
    fn test_handshake_rejects_bad_pstrlen() {
        let mut buf = BytesMut::new();
        buf.put_u8(18);
        buf.put_bytes(0, HANDSHAKE_LEN - 1);
        let mut codec = HandshakeCodec;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::InvalidProtocolLength(18))
        ));
    }

    #[test]
    fn test_handshake_rejects_bad_pstr() {
        let mut buf = BytesMut::new();
        buf.put_u8(19);
        buf.put(&b"AAAAAAAAAAAAAAAAAAA"[..]);
        buf.put_bytes(0, HANDSHAKE_LEN - 20);
        let mut codec = HandshakeCodec;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::InvalidProtocolString)
        ));
    }

    #[test]
    fn test_handshake_waits_for_full_frame() {
        let mut buf = BytesMut::new();
        buf.put_u8(19);
        buf.put(&b"BitTorrent protocol"[..]);
        let mut codec = HandshakeCodec;
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
