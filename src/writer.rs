//! The boundary to the on-disk writer.
//!
//! Turning a verified piece's bytes into file writes (including multi-file
//! layout and partial-piece file-boundary splitting) is someone else's job;
//! this module only defines the handoff.

use crate::PieceIndex;

/// Receives verified, assembled piece bytes for writing to disk.
///
/// A real engine binds this to whatever its on-disk writer looks like;
/// `enqueue` here is a thin default that just logs, standing in for that
/// external collaborator.
pub trait PieceSink: Send + Sync {
    fn enqueue_verified_piece(&self, index: PieceIndex, data: Vec<u8>);
}

/// A `PieceSink` that only logs. Useful in tests and as a default when no
/// writer has been wired up yet.
pub struct NullSink;

impl PieceSink for NullSink {
    fn enqueue_verified_piece(&self, index: PieceIndex, data: Vec<u8>) {
        log::debug!("piece {} ready for writer ({} bytes)", index, data.len());
    }
}
