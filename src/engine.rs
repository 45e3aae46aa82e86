//! The orchestrator: turns a parsed metainfo file and a configuration into a
//! running download, wiring the tracker client, the shared session and one
//! connection task per peer together.

use crate::conf::Conf;
use crate::error::Result;
use crate::metainfo::Metainfo;
use crate::peer::session::PeerSession;
use crate::peer::state::PeerAddr;
use crate::session::Session;
use crate::tracker::{self, AnnounceRequest};
use crate::writer::PieceSink;
use crate::Piece;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Engine {
    conf: Conf,
}

impl Engine {
    pub fn new(conf: Conf) -> Self {
        Self { conf }
    }

    /// Downloads every piece of `metainfo`, handing each verified piece to
    /// `sink` as it completes. Returns once every peer session has ended,
    /// whether because the torrent completed or every peer dropped off.
    pub async fn download(
        &self,
        metainfo: &Metainfo,
        sink: Arc<dyn PieceSink>,
    ) -> Result<()> {
        let info_hash = metainfo.info_hash()?;
        let pieces: Vec<Piece> = (0..metainfo.piece_count())
            .map(|index| {
                Piece::new(index, metainfo.piece_hash(index), metainfo.piece_len(index))
            })
            .collect();
        log::info!(
            "starting download of {} ({} pieces)",
            metainfo.info.name,
            pieces.len()
        );
        let session = Arc::new(Mutex::new(Session::new(pieces)));

        let request = AnnounceRequest {
            announce_url: &metainfo.announce,
            info_hash,
            peer_id: self.conf.engine.client_id,
            port: 0,
            uploaded: 0,
            downloaded: 0,
            left: metainfo.total_content_size(),
        };
        let response = tracker::announce(&request).await?;

        let host = local_host_addr();
        let peers: Vec<PeerAddr> = response
            .peers
            .into_iter()
            .filter(|addr| Some(*addr) != host)
            .take(self.conf.torrent.max_connected_peer_count)
            .collect();
        log::debug!("connecting to {} peers", peers.len());

        let mut handles = Vec::with_capacity(peers.len());
        for addr in peers {
            let peer_session = PeerSession::new(
                addr,
                info_hash,
                self.conf.engine.client_id,
                self.conf.torrent.max_connect_attempts,
                Arc::clone(&session),
                Arc::clone(&sink),
            );
            handles.push(tokio::spawn(async move {
                if let Err(e) = peer_session.start().await {
                    log::warn!("peer {} session ended: {}", addr, e);
                }
            }));
        }

        for handle in handles {
            // a peer task panicking shouldn't bring down the whole download;
            // every other peer's socket is still closed on its own exit path.
            let _ = handle.await;
        }

        let complete = session.lock().await.is_complete();
        if complete {
            log::info!("download of {} complete", metainfo.info.name);
        } else {
            log::warn!(
                "download of {} ended without completing (no peers left)",
                metainfo.info.name
            );
        }

        Ok(())
    }
}

/// A best-effort identification of our own address, used to filter ourselves
/// out of the tracker's peer list in case it (incorrectly) includes us: the
/// address of the local interface that would be used to reach the public
/// internet. This has no well-known port since this engine never listens for
/// inbound connections, so only addresses sharing both IP and a zero port
/// would ever match; in practice this filter rarely fires and exists mostly
/// for parity with trackers that do echo the requester back.
fn local_host_addr() -> Option<PeerAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    match addr.ip() {
        std::net::IpAddr::V4(ip) => Some(PeerAddr::new(u32::from(ip), 0)),
        std::net::IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_new_carries_conf() {
        let conf = Conf::new();
        let engine = Engine::new(conf.clone());
        assert_eq!(engine.conf.torrent.max_connect_attempts, conf.torrent.max_connect_attempts);
    }
}
