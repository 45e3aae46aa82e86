//! Hand-rolled error types for the engine.
//!
//! `Error` is the top-level variant returned from connection and download
//! operations (`Error::InvalidPeerInfoHash`, `Error::PeerNotSeed`,
//! `Error::InvalidPieceIndex`), extended with the decode/tracker error kinds
//! this engine needs. No `thiserror` or `anyhow` is used here; each error
//! type implements `std::error::Error` and `Display` by hand.

use std::fmt;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can arise while decoding a framed wire message (handshake or
/// post-handshake message). Fatal for the connection that produced them, not
/// for the torrent.
#[derive(Debug)]
pub enum DecodeError {
    /// An unsupported or malformed payload was found for a known message id.
    InvalidPayload { id: u8, expected_at_least: usize, got: usize },
    /// `pstrlen` was not 19.
    InvalidProtocolLength(u8),
    /// `pstr` was not `"BitTorrent protocol"`.
    InvalidProtocolString,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload { id, expected_at_least, got } => write!(
                f,
                "invalid payload for message id {}: expected at least {} bytes, got {}",
                id, expected_at_least, got
            ),
            Self::InvalidProtocolLength(len) => {
                write!(f, "invalid handshake pstrlen: {}", len)
            }
            Self::InvalidProtocolString => {
                write!(f, "invalid handshake protocol string")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can arise while decoding a tracker's bencoded announce
/// response. Fatal for torrent startup.
#[derive(Debug)]
pub enum TrackerError {
    /// The response did not contain a `peers` key.
    MissingPeersKey,
    /// The compact peer list's byte length was not a multiple of 6.
    InvalidCompactPeerListLength(usize),
    /// A peer entry in the dictionary model had a malformed or missing
    /// `ip`/`port` field.
    InvalidPeerAddress,
    /// The bencoded response (or its non-peers remainder) failed to parse.
    Bencode(serde_bencode::Error),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeersKey => {
                write!(f, "tracker response is missing the 'peers' key")
            }
            Self::InvalidCompactPeerListLength(len) => write!(
                f,
                "compact peer list length {} is not a multiple of 6",
                len
            ),
            Self::InvalidPeerAddress => {
                write!(f, "invalid peer ip/port in dictionary-model peer list")
            }
            Self::Bencode(e) => write!(f, "bencode decode error: {}", e),
        }
    }
}

impl std::error::Error for TrackerError {}

/// The engine's top-level error type.
#[derive(Debug)]
pub enum Error {
    /// Wraps an I/O error (connect refused, broken pipe, EOF mid-frame).
    Io(std::io::Error),
    /// A framing/handshake/message decode error; fatal for the connection
    /// that produced it.
    Decode(DecodeError),
    /// A tracker announce response failed to decode; fatal for torrent
    /// startup.
    Tracker(TrackerError),
    /// The metainfo file failed to parse.
    Metainfo(serde_bencode::Error),
    /// The peer's handshake declared an info-hash different from ours.
    InvalidPeerInfoHash,
    /// The peer turned out not to be a seed (used by session variants that
    /// require full piece availability; unused by the default leech session
    /// but kept for parity with partial-seed rejection policies).
    PeerNotSeed,
    /// A piece index was out of bounds for the torrent.
    InvalidPieceIndex,
    /// Every connection attempt to the peer failed.
    ConnectAttemptsExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Tracker(e) => write!(f, "tracker error: {}", e),
            Self::Metainfo(e) => write!(f, "metainfo error: {}", e),
            Self::InvalidPeerInfoHash => {
                write!(f, "peer handshake info hash mismatch")
            }
            Self::PeerNotSeed => write!(f, "peer is not a seed"),
            Self::InvalidPieceIndex => write!(f, "invalid piece index"),
            Self::ConnectAttemptsExhausted => {
                write!(f, "exhausted all connection attempts to peer")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<TrackerError> for Error {
    fn from(e: TrackerError) -> Self {
        Self::Tracker(e)
    }
}
