//! Per-peer connection lifecycle and state.
//!
//! Split into two pieces, deliberately decoupled: [`state`] holds the flags,
//! bitfield and in-flight bookkeeping the central session tracks for a peer,
//! while [`session`] owns the actual TCP connection and only ever talks to
//! the rest of the engine through the shared session lock and a command
//! channel.

pub mod session;
pub mod state;

pub use session::PeerSession;
pub use state::{PeerAddr, PeerState};
