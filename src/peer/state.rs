//! Per-peer protocol flags, piece availability, and in-flight request
//! bookkeeping.

use crate::{Bitfield, BlockInfo, PieceIndex};

/// A peer's IPv4 address, used to identify and deduplicate peers from the
/// tracker's peer list. Equality is address-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: u32,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    /// This address as a standard library socket address.
    pub fn to_socket_addr(self) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(std::net::Ipv4Addr::from(self.ip), self.port)
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

/// The state of a single peer connection, as tracked by the central download
/// session. Both sides of the connection start off choked and not interested
/// in the other.
#[derive(Clone, Debug)]
pub struct PeerState {
    pub choked_by_remote: bool,
    pub choking_remote: bool,
    pub interested_in_remote: bool,
    pub remote_interested: bool,
    pub remote_bitfield: Bitfield,
    /// Blocks requested from this peer and not yet received or cancelled.
    /// Contains no duplicates.
    inflight: Vec<BlockInfo>,
    /// Whether this peer's session is READY (past handshake) and can
    /// currently be asked for blocks.
    pub is_ready: bool,
}

impl PeerState {
    /// Creates a new peer state with a zeroed bitfield of `piece_count` bits,
    /// both sides choked and not interested.
    pub fn new(piece_count: usize) -> Self {
        Self {
            choked_by_remote: true,
            choking_remote: true,
            interested_in_remote: false,
            remote_interested: false,
            remote_bitfield: Bitfield::repeat(false, piece_count),
            inflight: Vec::new(),
            is_ready: false,
        }
    }

    /// Whether this peer is eligible to be asked for `piece_index`.
    pub fn is_eligible_for(&self, piece_index: PieceIndex) -> bool {
        self.is_ready
            && !self.choked_by_remote
            && self.interested_in_remote
            && self
                .remote_bitfield
                .get(piece_index)
                .map(|b| *b)
                .unwrap_or(false)
    }

    /// Records a Have(i) message: sets bit `i`. Bits only ever flip 0->1.
    pub fn set_have(&mut self, piece_index: PieceIndex) {
        if let Some(mut bit) = self.remote_bitfield.get_mut(piece_index) {
            *bit = true;
        }
    }

    /// Replaces the remote bitfield wholesale, as happens on a Bitfield
    /// message. The raw wire payload may be longer than the logical
    /// piece count if it isn't a multiple of 8 bits; it is resized down (and
    /// any missing trailing bits padded with `false`) so indices beyond
    /// `piece_count` never appear.
    pub fn set_bitfield(&mut self, mut bitfield: Bitfield, piece_count: usize) {
        bitfield.resize(piece_count, false);
        self.remote_bitfield = bitfield;
    }

    /// Appends `block` to this peer's in-flight queue. The caller (the
    /// scheduler) is responsible for ensuring no duplicates exist system-wide.
    pub fn add_inflight(&mut self, block: BlockInfo) {
        debug_assert!(!self.inflight.contains(&block));
        self.inflight.push(block);
    }

    /// Removes `block` from this peer's in-flight queue if present, returning
    /// whether it was found.
    pub fn remove_inflight(&mut self, block: &BlockInfo) -> bool {
        if let Some(pos) = self.inflight.iter().position(|b| b == block) {
            self.inflight.remove(pos);
            true
        } else {
            false
        }
    }

    /// True if `block` is currently outstanding against this peer.
    pub fn has_inflight(&self, block: &BlockInfo) -> bool {
        self.inflight.contains(block)
    }

    /// A read-only view of this peer's in-flight requests.
    pub fn inflight(&self) -> &[BlockInfo] {
        &self.inflight
    }

    /// Drains and returns every in-flight request for this peer. Called when
    /// the peer chokes us: we no longer expect a response to any pending
    /// request.
    pub fn abandon_inflight(&mut self) -> Vec<BlockInfo> {
        std::mem::take(&mut self.inflight)
    }
}
