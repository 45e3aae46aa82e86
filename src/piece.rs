//! The piece/block model: pieces split into blocks, completion tracking, and
//! hash verification.

use crate::{block_count, block_len, BlockInfo, PieceIndex, Sha1Hash, BLOCK_LEN};
use sha1::{Digest, Sha1};

/// A block's completion state within its owning piece.
#[derive(Clone, Debug)]
struct BlockSlot {
    complete: bool,
}

/// A fixed-size chunk of the torrent content, the unit of hash verification.
/// A piece's block layout never changes once created; its byte buffer
/// is assembled in place as blocks arrive and released to the writer once
/// verified.
#[derive(Clone, Debug)]
pub struct Piece {
    pub index: PieceIndex,
    pub expected_hash: Sha1Hash,
    pub len: u32,
    blocks: Vec<BlockSlot>,
    buf: Vec<u8>,
}

impl Piece {
    /// Creates a new piece of `len` bytes, pre-split into blocks of the
    /// canonical length (the last block possibly shorter).
    pub fn new(index: PieceIndex, expected_hash: Sha1Hash, len: u32) -> Self {
        let blocks = (0..block_count(len))
            .map(|_| BlockSlot { complete: false })
            .collect();
        Self {
            index,
            expected_hash,
            len,
            blocks,
            buf: vec![0; len as usize],
        }
    }

    /// The number of blocks in this piece.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The length of the block at `block_index` within this piece.
    pub fn block_len(&self, block_index: usize) -> u32 {
        block_len(self.len, block_index)
    }

    /// Returns the `BlockInfo` for the block at `block_index`, or `None` if
    /// out of range.
    pub fn block_info(&self, block_index: usize) -> Option<BlockInfo> {
        if block_index >= self.blocks.len() {
            return None;
        }
        Some(BlockInfo {
            piece_index: self.index,
            offset: block_index as u32 * BLOCK_LEN,
            len: self.block_len(block_index),
        })
    }

    /// Whether the block at `block_index` has already been received.
    pub fn is_block_complete(&self, block_index: usize) -> bool {
        self.blocks
            .get(block_index)
            .map(|b| b.complete)
            .unwrap_or(false)
    }

    /// Whether every block in this piece has arrived (this does *not* imply
    /// the piece hash has been verified; see [`Piece::is_complete`]).
    fn all_blocks_received(&self) -> bool {
        self.blocks.iter().all(|b| b.complete)
    }

    /// Copies a received block's payload into the piece buffer and marks the
    /// block complete. Returns `true` if this was the last missing block,
    /// i.e. the piece is now ready for hash verification.
    ///
    /// `begin` must fall exactly on a block boundary and `data.len()` must
    /// match the expected block length; mismatches are silently ignored and
    /// the block treated as a stray or duplicate.
    pub fn receive_block(&mut self, begin: u32, data: &[u8]) -> bool {
        if begin % BLOCK_LEN != 0 {
            return false;
        }
        let block_index = (begin / BLOCK_LEN) as usize;
        let Some(expected_len) = self.blocks.get(block_index).map(|_| self.block_len(block_index))
        else {
            return false;
        };
        if data.len() as u32 != expected_len {
            return false;
        }

        let start = begin as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.blocks[block_index].complete = true;

        self.all_blocks_received()
    }

    /// Verifies the assembled buffer against `expected_hash`. Must only be
    /// called once [`Piece::all_blocks_received`] is true.
    pub fn verify(&self) -> bool {
        let digest = Sha1::digest(&self.buf);
        digest.as_slice() == self.expected_hash
    }

    /// Resets every block's completion state, allowing the scheduler to
    /// reissue requests for this piece. Used on hash mismatch.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.complete = false;
        }
    }

    /// Consumes the piece, returning its assembled byte buffer for handoff
    /// to the writer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
