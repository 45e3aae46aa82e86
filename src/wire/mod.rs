//! The peer wire protocol: framing, handshake, and the post-handshake
//! message catalogue. Bit-exact with BEP-3's basic peer protocol.

mod codec;
mod handshake;
mod message;

pub use codec::PeerCodec;
pub use handshake::{Handshake, HandshakeCodec, PROTOCOL_STRING};
pub use message::{Message, MessageId};
