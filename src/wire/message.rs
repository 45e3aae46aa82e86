//! The post-handshake message catalogue.

use crate::{Bitfield, BlockInfo};

/// The wire message ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Extended = 20,
}

impl MessageId {
    /// Converts a raw wire id to a known `MessageId`, if recognized.
    ///
    /// Unknown ids are not an error at this layer: the read loop still has
    /// to consume the payload to keep the stream aligned, it just won't get
    /// a decoded `Message` variant back.
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Choke),
            1 => Some(Self::Unchoke),
            2 => Some(Self::Interested),
            3 => Some(Self::NotInterested),
            4 => Some(Self::Have),
            5 => Some(Self::Bitfield),
            6 => Some(Self::Request),
            7 => Some(Self::Piece),
            8 => Some(Self::Cancel),
            20 => Some(Self::Extended),
            _ => None,
        }
    }
}

/// A decoded post-handshake peer message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A zero-length frame, used to hold the connection open.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece { piece_index: u32, begin: u32, data: Vec<u8> },
    Cancel(BlockInfo),
    /// Opaque extended-protocol payload (id 20); parsed-length-correct and
    /// then discarded.
    Extended(Vec<u8>),
}

impl Message {
    /// Returns the wire id of this message, or `None` for `KeepAlive`, which
    /// has no id on the wire.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::KeepAlive => None,
            Self::Choke => Some(MessageId::Choke),
            Self::Unchoke => Some(MessageId::Unchoke),
            Self::Interested => Some(MessageId::Interested),
            Self::NotInterested => Some(MessageId::NotInterested),
            Self::Have { .. } => Some(MessageId::Have),
            Self::Bitfield(_) => Some(MessageId::Bitfield),
            Self::Request(_) => Some(MessageId::Request),
            Self::Piece { .. } => Some(MessageId::Piece),
            Self::Cancel(_) => Some(MessageId::Cancel),
            Self::Extended(_) => Some(MessageId::Extended),
        }
    }
}
