//! The piece/block scheduler: a pure function over the session's pieces,
//! peer states and cursor. It holds no state of its own and peers never
//! hold a back-reference to it.

use crate::{session::Session, BlockInfo, PieceIndex};

/// Selects the next `(peer_index, block)` to request, via an in-order sweep
/// over pieces and their blocks.
///
/// The block cursor advances *before* the eligibility check on each
/// candidate block: a block skipped because it was already in-flight against
/// the only currently-eligible peer for its piece is not re-examined until
/// the cursor wraps all the way around. This is an intentional, unchanged
/// behavior (see DESIGN.md).
pub(crate) fn select_next(session: &mut Session) -> Option<(usize, BlockInfo)> {
    let piece_count = session.piece_count();
    while session.cursor().0 < piece_count {
        let piece_index: PieceIndex = session.cursor().0;
        if !session.is_piece_downloaded(piece_index) {
            if let Some(peer_index) = find_eligible_peer(session, piece_index) {
                let block_count = session.piece_block_count(piece_index);
                while session.cursor().1 < block_count {
                    let block_index = session.cursor().1;
                    session.advance_block_cursor();
                    let block = session
                        .piece_block_info(piece_index, block_index)
                        .expect("block index in range");
                    let already_complete =
                        session.is_piece_block_complete(piece_index, block_index);
                    let already_inflight =
                        session.peer_has_inflight(peer_index, &block);
                    if !already_complete && !already_inflight {
                        return Some((peer_index, block));
                    }
                }
            }
        }
        session.advance_piece_cursor();
    }
    session.reset_cursor();
    None
}

/// Returns the index of the first peer eligible to be asked for
/// `piece_index`: READY, not choking us, we're interested, and it has the
/// piece. First-match, not prioritized.
fn find_eligible_peer(session: &Session, piece_index: PieceIndex) -> Option<usize> {
    (0..session.peer_count()).find(|&i| session.peer_is_eligible_for(i, piece_index))
}

/// Scans every peer other than `from_peer` for an in-flight entry matching
/// `block` and removes it, returning the indices of peers a Cancel must be
/// sent to. At most one match per peer is removed, since duplicate
/// in-flight entries are forbidden by construction.
pub(crate) fn cancel_duplicates(
    session: &mut Session,
    from_peer: usize,
    block: &BlockInfo,
) -> Vec<usize> {
    (0..session.peer_count())
        .filter(|&i| i != from_peer)
        .filter(|&i| session.peer_remove_inflight(i, block))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::state::PeerAddr;
    use crate::Piece;
    use tokio::sync::mpsc;

    fn make_session(piece_count: usize, piece_len: u32) -> Session {
        let pieces = (0..piece_count)
            .map(|i| Piece::new(i, [0u8; 20], piece_len))
            .collect();
        Session::new(pieces)
    }

    fn add_peer(session: &mut Session) -> usize {
        let (tx, _rx) = mpsc::unbounded_channel();
        let idx = session.add_peer(PeerAddr::new(0x0A000001, 6881), tx);
        session.set_peer_ready(idx, true);
        session.set_peer_choked_by_remote(idx, false);
        session.set_peer_interested_in_remote(idx, true);
        idx
    }

    #[test]
    fn test_select_next_returns_none_with_no_peers() {
        let mut session = make_session(1, crate::BLOCK_LEN);
        assert!(select_next(&mut session).is_none());
    }

    #[test]
    fn test_select_next_requires_bitfield_bit() {
        let mut session = make_session(1, crate::BLOCK_LEN);
        add_peer(&mut session);
        // bit 0 never set: peer has nothing
        assert!(select_next(&mut session).is_none());
    }

    #[test]
    fn test_select_next_issues_both_blocks_of_two_block_piece() {
        let mut session = make_session(1, 2 * crate::BLOCK_LEN);
        let peer = add_peer(&mut session);
        session.peer_set_have(peer, 0);

        let (p0, b0) = select_next(&mut session).unwrap();
        assert_eq!(p0, peer);
        assert_eq!(b0.offset, 0);
        session.peer_add_inflight(peer, b0);

        let (p1, b1) = select_next(&mut session).unwrap();
        assert_eq!(p1, peer);
        assert_eq!(b1.offset, crate::BLOCK_LEN);
        session.peer_add_inflight(peer, b1);

        // both blocks now in-flight against the only peer: nothing left to
        // issue on this sweep
        assert!(select_next(&mut session).is_none());
    }

    #[test]
    fn test_cancel_duplicates_removes_from_other_peers_only() {
        let mut session = make_session(1, crate::BLOCK_LEN);
        let a = add_peer(&mut session);
        let b = add_peer(&mut session);
        let block = BlockInfo {
            piece_index: 0,
            offset: 0,
            len: crate::BLOCK_LEN,
        };
        session.peer_add_inflight(a, block);
        session.peer_add_inflight(b, block);

        let cancelled = cancel_duplicates(&mut session, a, &block);
        assert_eq!(cancelled, vec![b]);
        assert!(!session.peer_has_inflight(b, &block));
        // `from_peer`'s own entry is untouched by cancellation
        assert!(session.peer_has_inflight(a, &block));
    }
}
