//! A single outbound peer connection: its own TCP socket, its own read loop,
//! and a command channel through which the rest of the engine talks to it.
//!
//! `PeerSession` holds no piece or scheduling state itself; every message it
//! decodes is handed to the shared [`Session`] under a brief lock, and every
//! message it needs to send out arrives over its command channel, set by
//! that same lock. This is what lets the scheduler and message dispatch stay
//! fully synchronous even though many peer connections run concurrently.

use crate::error::{Error, Result};
use crate::peer::state::PeerAddr;
use crate::session::{PeerCommand, Session};
use crate::wire::{Handshake, HandshakeCodec, Message, PeerCodec, PROTOCOL_STRING};
use crate::writer::PieceSink;
use crate::{PeerId, Sha1Hash};
use futures::{select, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, FramedParts};

pub struct PeerSession {
    addr: PeerAddr,
    info_hash: Sha1Hash,
    client_id: PeerId,
    max_connect_attempts: u8,
    session: Arc<Mutex<Session>>,
    sink: Arc<dyn PieceSink>,
    outbox: UnboundedSender<PeerCommand>,
    cmd_port: UnboundedReceiver<PeerCommand>,
}

impl PeerSession {
    /// Creates a new outbound session. Nothing is registered with the shared
    /// `session` yet; that happens once the handshake succeeds, in
    /// [`PeerSession::start`].
    pub fn new(
        addr: PeerAddr,
        info_hash: Sha1Hash,
        client_id: PeerId,
        max_connect_attempts: u8,
        session: Arc<Mutex<Session>>,
        sink: Arc<dyn PieceSink>,
    ) -> Self {
        let (outbox, cmd_port) = mpsc::unbounded_channel();
        Self {
            addr,
            info_hash,
            client_id,
            max_connect_attempts,
            session,
            sink,
            outbox,
            cmd_port,
        }
    }

    /// Connects to the peer (up to `max_connect_attempts` times, no backoff
    /// between attempts), performs the handshake, registers with the shared
    /// session, and runs the message loop until the connection closes or an
    /// error occurs.
    ///
    /// The peer's slot in the shared session is always removed before this
    /// returns, on every exit path.
    pub async fn start(mut self) -> Result<()> {
        let socket = self.connect().await?;
        let mut framed = Framed::new(socket, HandshakeCodec);

        let handshake = Handshake::new(self.info_hash, self.client_id);
        log::debug!("sending handshake to {}", self.addr);
        framed.send(handshake).await?;

        let peer_handshake = match framed.next().await {
            Some(h) => h?,
            None => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before handshake",
                )))
            }
        };
        debug_assert_eq!(PROTOCOL_STRING.len(), 19);
        if peer_handshake.info_hash != self.info_hash {
            log::info!(
                "peer {} sent mismatched info hash {} (expected {})",
                self.addr,
                hex::encode(peer_handshake.info_hash),
                hex::encode(self.info_hash)
            );
            return Err(Error::InvalidPeerInfoHash);
        }
        log::debug!("peer {} handshake ok", self.addr);

        let old_parts = framed.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, PeerCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let socket = Framed::from_parts(new_parts);

        let peer_index = {
            let mut session = self.session.lock().await;
            let index = session.add_peer(self.addr, self.outbox.clone());
            session.set_peer_ready(index, true);
            session.set_peer_interested_in_remote(index, true);
            index
        };

        let (mut sink, stream) = socket.split();
        // we're READY: announce interest immediately, before entering the
        // message loop.
        if let Err(e) = sink.send(Message::Interested).await {
            let mut session = self.session.lock().await;
            session.remove_peer(peer_index);
            return Err(e.into());
        }

        let result = self.run(peer_index, sink, stream).await;

        {
            let mut session = self.session.lock().await;
            session.remove_peer(peer_index);
        }

        result
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for attempt in 1..=self.max_connect_attempts {
            log::debug!(
                "connecting to {} (attempt {}/{})",
                self.addr,
                attempt,
                self.max_connect_attempts
            );
            match TcpStream::connect(self.addr.to_socket_addr()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    log::debug!(
                        "connect attempt {} to {} failed: {}",
                        attempt, self.addr, e
                    );
                    last_err = Some(e);
                }
            }
        }
        log::info!(
            "giving up on peer {} after {} attempts: {:?}",
            self.addr, self.max_connect_attempts, last_err
        );
        Err(Error::ConnectAttemptsExhausted)
    }

    /// Drives the post-handshake message exchange until the connection
    /// closes, an error occurs, or a `Shutdown` command arrives.
    async fn run<Sink, Stream>(
        &mut self,
        peer_index: usize,
        mut sink: Sink,
        stream: Stream,
    ) -> Result<()>
    where
        Sink: futures::Sink<Message, Error = std::io::Error> + Unpin,
        Stream: futures::Stream<
                Item = std::result::Result<Message, crate::error::DecodeError>,
            > + Unpin,
    {
        let mut stream = stream.fuse();

        loop {
            select! {
                msg = stream.select_next_some() => {
                    let msg = msg?;
                    log::trace!("peer {} sent {:?}", self.addr, msg.id());
                    let outcome = {
                        let mut session = self.session.lock().await;
                        let outcome = session.dispatch(peer_index, msg);
                        // a received message may have freed up a request
                        // slot or made a peer eligible; keep the pipeline as
                        // full as the scheduler currently allows.
                        while let Some((idx, req)) = session.try_request_next() {
                            session.dispatch_command(idx, PeerCommand::Send(req));
                        }
                        outcome
                    };
                    if let Some((index, bytes)) = outcome.verified_piece {
                        log::info!("piece {} verified ({} bytes)", index, bytes.len());
                        self.sink.enqueue_verified_piece(index, bytes);
                    }
                    if let Some(index) = outcome.failed_piece {
                        log::warn!("piece {} failed hash verification, reset", index);
                    }
                }
                cmd = self.cmd_port.recv() => {
                    match cmd {
                        Some(PeerCommand::Send(msg)) => {
                            sink.send(msg).await?;
                        }
                        Some(PeerCommand::Shutdown) | None => {
                            log::debug!("shutting down peer {} session", self.addr);
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
