//! The central download session: owns every piece, every peer's state and
//! the scheduler's cursor, and dispatches incoming messages.
//!
//! A `Session` is meant to be wrapped in `Arc<tokio::sync::Mutex<Session>>`
//! and shared between the orchestrator and every peer's connection task.
//! Every method on `Session` is synchronous: nothing here ever awaits while
//! holding the lock, so a single coarse mutex is enough even when peer tasks
//! run in parallel on multiple OS threads.

use crate::peer::state::{PeerAddr, PeerState};
use crate::wire::Message;
use crate::{scheduler, BlockInfo, Piece, PieceIndex};
use tokio::sync::mpsc::UnboundedSender;

/// A command sent to a single peer's connection task over its outbound
/// channel.
#[derive(Debug)]
pub enum PeerCommand {
    Send(Message),
    Shutdown,
}

/// Bookkeeping the session keeps for one connected (or connecting) peer.
pub struct PeerSlot {
    pub addr: PeerAddr,
    pub state: PeerState,
    outbox: UnboundedSender<PeerCommand>,
}

/// The outcome of handing an inbound message to [`Session::dispatch`]: what,
/// if anything, the caller needs to do about it. The session never sends on
/// a peer's outbox itself so that ownership of "who talks to the network"
/// stays entirely in the peer's connection task, and the session itself
/// never has to suspend while holding its lock.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// A piece that just passed hash verification and is ready for the
    /// writer.
    pub verified_piece: Option<(PieceIndex, Vec<u8>)>,
    /// A piece whose hash failed to verify and has been reset for
    /// redownload.
    pub failed_piece: Option<PieceIndex>,
}

pub struct Session {
    pieces: Vec<Piece>,
    downloaded: Vec<bool>,
    // `None` marks a removed peer's slot as a tombstone rather than
    // shifting every later slot down: a `PeerSession` task caches its index
    // once and reuses it for the life of the connection, so indices must
    // stay stable across removals of other peers.
    peers: Vec<Option<PeerSlot>>,
    cursor: (usize, usize),
}

impl Session {
    pub fn new(pieces: Vec<Piece>) -> Self {
        let downloaded = vec![false; pieces.len()];
        Self {
            pieces,
            downloaded,
            peers: Vec::new(),
            cursor: (0, 0),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Whether every piece has been downloaded and verified.
    pub fn is_complete(&self) -> bool {
        self.downloaded.iter().all(|&done| done)
    }

    pub fn is_piece_downloaded(&self, index: PieceIndex) -> bool {
        self.downloaded[index]
    }

    pub fn piece_block_count(&self, index: PieceIndex) -> usize {
        self.pieces[index].block_count()
    }

    pub fn piece_block_info(
        &self,
        piece_index: PieceIndex,
        block_index: usize,
    ) -> Option<BlockInfo> {
        self.pieces[piece_index].block_info(block_index)
    }

    pub fn is_piece_block_complete(
        &self,
        piece_index: PieceIndex,
        block_index: usize,
    ) -> bool {
        self.pieces[piece_index].is_block_complete(block_index)
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub(crate) fn advance_block_cursor(&mut self) {
        self.cursor.1 += 1;
    }

    pub(crate) fn advance_piece_cursor(&mut self) {
        self.cursor.0 += 1;
        self.cursor.1 = 0;
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = (0, 0);
    }

    /// Registers a newly connecting/connected peer and returns its slot
    /// index, used by the caller to address it in every subsequent call.
    /// The index is stable for the life of the peer's connection: it is
    /// never reused or shifted by the removal of another peer.
    pub fn add_peer(
        &mut self,
        addr: PeerAddr,
        outbox: UnboundedSender<PeerCommand>,
    ) -> usize {
        let state = PeerState::new(self.piece_count());
        self.peers.push(Some(PeerSlot {
            addr,
            state,
            outbox,
        }));
        self.peers.len() - 1
    }

    /// Removes a peer's slot, abandoning any in-flight requests it held.
    /// The scheduler will redirect those blocks to other peers on its next
    /// sweep.
    ///
    /// This tombstones the slot rather than shifting the vector down, so
    /// every other peer's previously-returned index keeps addressing the
    /// same slot.
    pub fn remove_peer(&mut self, index: usize) {
        if let Some(slot) = self.peers.get_mut(index) {
            *slot = None;
        }
    }

    fn slot(&self, index: usize) -> Option<&PeerSlot> {
        self.peers.get(index)?.as_ref()
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut PeerSlot> {
        self.peers.get_mut(index)?.as_mut()
    }

    /// The number of peer slots, including tombstoned (removed) ones. This
    /// is a stable upper bound for iterating peer indices; it is not a count
    /// of currently-connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addr(&self, index: usize) -> Option<PeerAddr> {
        self.slot(index).map(|slot| slot.addr)
    }

    pub fn set_peer_ready(&mut self, index: usize, ready: bool) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state.is_ready = ready;
        }
    }

    pub fn set_peer_choked_by_remote(&mut self, index: usize, choked: bool) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state.choked_by_remote = choked;
        }
    }

    pub fn set_peer_interested_in_remote(&mut self, index: usize, interested: bool) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state.interested_in_remote = interested;
        }
    }

    pub fn peer_is_eligible_for(&self, index: usize, piece_index: PieceIndex) -> bool {
        self.slot(index)
            .map_or(false, |slot| slot.state.is_eligible_for(piece_index))
    }

    pub fn peer_has_inflight(&self, index: usize, block: &BlockInfo) -> bool {
        self.slot(index)
            .map_or(false, |slot| slot.state.has_inflight(block))
    }

    pub fn peer_add_inflight(&mut self, index: usize, block: BlockInfo) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state.add_inflight(block);
        }
    }

    pub fn peer_remove_inflight(&mut self, index: usize, block: &BlockInfo) -> bool {
        self.slot_mut(index)
            .map_or(false, |slot| slot.state.remove_inflight(block))
    }

    pub fn peer_set_have(&mut self, index: usize, piece_index: PieceIndex) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state.set_have(piece_index);
        }
    }

    /// Asks the scheduler for the next block to request and, if one was
    /// found, records it as in-flight against the chosen peer and returns
    /// the `(peer_index, Request message)` pair for the caller to dispatch.
    pub fn try_request_next(&mut self) -> Option<(usize, Message)> {
        let (peer_index, block) = scheduler::select_next(self)?;
        self.peer_add_inflight(peer_index, block);
        Some((peer_index, Message::Request(block)))
    }

    /// Sends a command directly to a peer's connection task. Used for
    /// requests issued by [`Session::try_request_next`] and for the Cancels
    /// issued by [`Session::handle_piece`]'s cross-peer deduplication; the
    /// session never suspends to do this, it only ever pushes onto an
    /// unbounded channel.
    pub fn dispatch_command(&self, peer_index: usize, cmd: PeerCommand) {
        if let Some(slot) = self.slot(peer_index) {
            let _ = slot.outbox.send(cmd);
        }
    }

    /// Hands an inbound message from `peer_index` to the session. Returns
    /// whatever follow-up the caller needs to act on. A no-op if
    /// `peer_index` no longer has a live slot (it was removed between the
    /// message being read off the wire and the lock being acquired).
    pub fn dispatch(&mut self, peer_index: usize, msg: Message) -> DispatchOutcome {
        match msg {
            Message::KeepAlive => {}
            Message::Choke => {
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.choked_by_remote = true;
                    slot.state.abandon_inflight();
                }
            }
            Message::Unchoke => {
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.choked_by_remote = false;
                }
            }
            Message::Interested => {
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.remote_interested = true;
                }
            }
            Message::NotInterested => {
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.remote_interested = false;
                }
            }
            Message::Have { piece_index } => {
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.set_have(piece_index as PieceIndex);
                }
            }
            Message::Bitfield(bitfield) => {
                let piece_count = self.piece_count();
                if let Some(slot) = self.slot_mut(peer_index) {
                    slot.state.set_bitfield(bitfield, piece_count);
                }
            }
            // seeding is out of scope: requests and cancels from peers are
            // acknowledged at the protocol level (the connection stays up)
            // but never acted upon.
            Message::Request(_) | Message::Cancel(_) => {}
            Message::Extended(_) => {}
            Message::Piece {
                piece_index,
                begin,
                data,
            } => {
                return self.handle_piece(peer_index, piece_index as PieceIndex, begin, &data);
            }
        }
        DispatchOutcome::default()
    }

    fn handle_piece(
        &mut self,
        peer_index: usize,
        piece_index: PieceIndex,
        begin: u32,
        data: &[u8],
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if piece_index >= self.pieces.len() || self.downloaded[piece_index] {
            return outcome;
        }

        let block = BlockInfo {
            piece_index,
            offset: begin,
            len: data.len() as u32,
        };
        // only accept a block this peer actually had in-flight: an
        // unrequested or already-cancelled block is dropped silently.
        let had_inflight = self
            .slot_mut(peer_index)
            .map_or(false, |slot| slot.state.remove_inflight(&block));
        if !had_inflight {
            return outcome;
        }

        // every other peer we'd also asked for this exact block can stop
        // waiting for it.
        let cancel_targets = scheduler::cancel_duplicates(self, peer_index, &block);
        for target in cancel_targets {
            if let Some(slot) = self.slot(target) {
                let _ = slot.outbox.send(PeerCommand::Send(Message::Cancel(block)));
            }
        }

        let piece_complete = self.pieces[piece_index].receive_block(begin, data);
        if !piece_complete {
            return outcome;
        }

        if self.pieces[piece_index].verify() {
            self.downloaded[piece_index] = true;
            let bytes = std::mem::replace(
                &mut self.pieces[piece_index],
                Piece::new(piece_index, [0u8; 20], 0),
            )
            .into_bytes();
            outcome.verified_piece = Some((piece_index, bytes));
        } else {
            self.pieces[piece_index].reset();
            outcome.failed_piece = Some(piece_index);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};
    use tokio::sync::mpsc;

    fn peer_addr() -> PeerAddr {
        PeerAddr::new(0x7F000001, 6881)
    }

    fn ready_peer(session: &mut Session) -> usize {
        let (tx, _rx) = mpsc::unbounded_channel();
        let idx = session.add_peer(peer_addr(), tx);
        session.set_peer_ready(idx, true);
        session.set_peer_choked_by_remote(idx, false);
        session.set_peer_interested_in_remote(idx, true);
        idx
    }

    #[test]
    fn test_choke_abandons_inflight() {
        let mut session = Session::new(vec![Piece::new(0, [0u8; 20], crate::BLOCK_LEN)]);
        let peer = ready_peer(&mut session);
        let block = BlockInfo {
            piece_index: 0,
            offset: 0,
            len: crate::BLOCK_LEN,
        };
        session.peer_add_inflight(peer, block);
        session.dispatch(peer, Message::Choke);
        assert!(!session.peer_has_inflight(peer, &block));
    }

    #[test]
    fn test_full_piece_receipt_verifies_and_reports() {
        let data = vec![7u8; crate::BLOCK_LEN as usize];
        let digest = Sha1::digest(&data);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);

        let mut session = Session::new(vec![Piece::new(0, hash, crate::BLOCK_LEN)]);
        let peer = ready_peer(&mut session);
        session.peer_set_have(peer, 0);
        let (requested_peer, msg) = session.try_request_next().unwrap();
        assert_eq!(requested_peer, peer);
        assert!(matches!(msg, Message::Request(_)));

        let outcome = session.dispatch(
            peer,
            Message::Piece {
                piece_index: 0,
                begin: 0,
                data: data.clone(),
            },
        );
        let (index, bytes) = outcome.verified_piece.unwrap();
        assert_eq!(index, 0);
        assert_eq!(bytes, data);
        assert!(session.is_complete());
    }

    #[test]
    fn test_bad_hash_resets_piece_for_redownload() {
        let mut session = Session::new(vec![Piece::new(0, [0u8; 20], crate::BLOCK_LEN)]);
        let peer = ready_peer(&mut session);
        session.peer_set_have(peer, 0);
        session.try_request_next().unwrap();

        let data = vec![1u8; crate::BLOCK_LEN as usize];
        let outcome = session.dispatch(
            peer,
            Message::Piece {
                piece_index: 0,
                begin: 0,
                data,
            },
        );
        assert_eq!(outcome.failed_piece, Some(0));
        assert!(!session.is_piece_downloaded(0));
        assert!(!session.is_piece_block_complete(0, 0));
    }

    #[test]
    fn test_unrequested_block_is_dropped() {
        let mut session = Session::new(vec![Piece::new(0, [0u8; 20], crate::BLOCK_LEN)]);
        let peer = ready_peer(&mut session);
        let data = vec![1u8; crate::BLOCK_LEN as usize];
        let outcome = session.dispatch(
            peer,
            Message::Piece {
                piece_index: 0,
                begin: 0,
                data,
            },
        );
        assert!(outcome.verified_piece.is_none());
        assert!(outcome.failed_piece.is_none());
    }

    #[test]
    fn test_cross_peer_cancellation_on_piece_arrival() {
        let mut session = Session::new(vec![Piece::new(0, [0u8; 20], crate::BLOCK_LEN)]);
        let a = ready_peer(&mut session);
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let b = session.add_peer(peer_addr(), tx_b);
        session.set_peer_ready(b, true);

        let block = BlockInfo {
            piece_index: 0,
            offset: 0,
            len: crate::BLOCK_LEN,
        };
        session.peer_add_inflight(a, block);
        session.peer_add_inflight(b, block);

        session.dispatch(
            a,
            Message::Piece {
                piece_index: 0,
                begin: 0,
                data: vec![0u8; crate::BLOCK_LEN as usize],
            },
        );

        assert!(!session.peer_has_inflight(b, &block));
        let cmd = rx_b.try_recv().unwrap();
        assert!(matches!(cmd, PeerCommand::Send(Message::Cancel(_))));
    }

    #[test]
    fn test_removing_lower_index_peer_does_not_renumber_higher_ones() {
        let mut session = Session::new(vec![Piece::new(0, [0u8; 20], crate::BLOCK_LEN)]);
        let p0 = ready_peer(&mut session);
        let p1 = ready_peer(&mut session);
        let p2 = ready_peer(&mut session);
        assert_eq!((p0, p1, p2), (0, 1, 2));

        // p0 disconnects while p1 and p2 are still live. With shifting
        // removal this would renumber p2's slot down to index 1, making its
        // cached index stale.
        session.remove_peer(p0);

        // p2's cached index must still address its own slot, not p1's.
        session.peer_set_have(p2, 0);
        assert!(session.peer_is_eligible_for(p2, 0));
        assert!(!session.peer_is_eligible_for(p1, 0));

        let block = BlockInfo {
            piece_index: 0,
            offset: 0,
            len: crate::BLOCK_LEN,
        };
        session.peer_add_inflight(p2, block);
        let outcome = session.dispatch(
            p2,
            Message::Piece {
                piece_index: 0,
                begin: 0,
                data: vec![0u8; crate::BLOCK_LEN as usize],
            },
        );
        assert!(outcome.verified_piece.is_some());

        // the removed peer's slot is inert, not a panic trigger.
        assert_eq!(session.peer_addr(p0), None);
        session.set_peer_ready(p0, true);
        assert!(!session.peer_is_eligible_for(p0, 0));
        session.dispatch_command(p0, PeerCommand::Shutdown);
    }
}
