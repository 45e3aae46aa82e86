//! Parses a torrent's metainfo (`.torrent`) file.
//!
//! Parsing a torrent's metainfo file is its own concern, kept separate from
//! the engine proper: the scheduler and peer sessions only ever consume a
//! handful of derived values (`announce`, `info_hash`, `total_content_size`,
//! `piece_count`, `piece_length`, `piece_hash(i)`). This module supplies
//! those values from a real bencoded metainfo file.

use crate::{error::Error, PieceIndex, Sha1Hash};
use sha1::{Digest, Sha1};

/// The length in bytes of a single piece hash entry in `Info::pieces`.
const PIECE_HASH_LEN: usize = 20;

#[derive(Debug, Deserialize)]
pub struct Metainfo {
    pub announce: String,
    pub info: Info,
}

impl Metainfo {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        serde_bencode::from_bytes(buf).map_err(Error::Metainfo)
    }

    /// Computes the SHA-1 hash of the bencoded `info` dictionary, which
    /// identifies this torrent on the wire and at the tracker.
    pub fn info_hash(&self) -> Result<Sha1Hash, Error> {
        let info = serde_bencode::to_bytes(&self.info).map_err(Error::Metainfo)?;
        let digest = Sha1::digest(&info);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&digest);
        Ok(info_hash)
    }

    /// The number of pieces in the torrent, derived from the length of the
    /// concatenated piece hashes.
    pub fn piece_count(&self) -> usize {
        self.info.pieces.len() / PIECE_HASH_LEN
    }

    /// The expected SHA-1 hash of piece `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn piece_hash(&self, index: PieceIndex) -> Sha1Hash {
        let start = index * PIECE_HASH_LEN;
        let mut hash = [0u8; PIECE_HASH_LEN];
        hash.copy_from_slice(&self.info.pieces[start..start + PIECE_HASH_LEN]);
        hash
    }

    /// The total content size in bytes, across all files.
    pub fn total_content_size(&self) -> u64 {
        match &self.info.files {
            Some(files) => files.iter().map(|f| f.length as u64).sum(),
            None => self.info.length.unwrap_or(0),
        }
    }

    /// The length of the piece at `index`, accounting for the last piece
    /// potentially being shorter than `piece_length`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        let piece_count = self.piece_count();
        assert!(index < piece_count, "piece index out of bounds");
        if index == piece_count - 1 {
            let full_pieces_len =
                self.info.piece_length * (piece_count - 1) as u64;
            (self.total_content_size() - full_pieces_len) as u32
        } else {
            self.info.piece_length as u32
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    pub length: Option<u64>,
    pub files: Option<Vec<File>>,
    pub private: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct File {
    pub path: Vec<String>,
    pub length: i64,
}
