//! This module defines types used to configure the engine and its parts.

use std::time::Duration;

use crate::PeerId;

/// The default client id announced to trackers and peers.
pub const DEFAULT_CLIENT_ID: &PeerId = b"-LE0001-000000000000";

/// The global configuration for the torrent engine and all its parts.
#[derive(Clone, Debug)]
pub struct Conf {
    pub engine: EngineConf,
    pub torrent: TorrentConf,
}

impl Conf {
    /// Returns a configuration with reasonable defaults, using the default
    /// client id, [`DEFAULT_CLIENT_ID`].
    pub fn new() -> Self {
        Self {
            engine: EngineConf {
                client_id: *DEFAULT_CLIENT_ID,
            },
            torrent: TorrentConf::default(),
        }
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration related to the engine itself.
#[derive(Clone, Debug)]
pub struct EngineConf {
    /// The ID of the client to announce to trackers and other peers. Constant
    /// across all peer sessions of a process.
    pub client_id: PeerId,
}

/// Configuration for a single torrent's download session.
#[derive(Clone, Debug)]
pub struct TorrentConf {
    /// The max number of connected peers the torrent should have. The
    /// orchestrator takes at most this many peers from the tracker's
    /// response before spawning connections.
    pub max_connected_peer_count: usize,

    /// The number of connection attempts made per peer before giving up on
    /// it.
    pub max_connect_attempts: u8,

    /// If the tracker doesn't provide a minimum announce interval, we
    /// default to this value between announces.
    pub announce_interval: Duration,
}

impl TorrentConf {
    pub fn new() -> Self {
        Self {
            // This value is mostly picked for performance while keeping in
            // mind not to overwhelm the host.
            max_connected_peer_count: 50,
            max_connect_attempts: 3,
            announce_interval: Duration::from_secs(30),
        }
    }
}

impl Default for TorrentConf {
    fn default() -> Self {
        Self::new()
    }
}
