mod metrics;

pub use metrics::{BitswapMetrics, DirectionCounters};

use crate::engine::Engine;
use crate::error::Result;
use crate::message::BitswapCodec;
use crate::peer::{Connection, PeerId};
use crate::storage::Blockstore;
use futures::StreamExt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// Which side opened the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Initiator,
    Responder,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Initiator => write!(f, "initiator"),
            Direction::Responder => write!(f, "responder"),
        }
    }
}

/// A negotiated bidirectional stream to a known peer
pub struct PeerStream<S> {
    pub peer_id: PeerId,
    pub remote_addr: SocketAddr,
    pub io: S,
}

impl<S> PeerStream<S> {
    pub fn new(peer_id: PeerId, remote_addr: SocketAddr, io: S) -> Self {
        Self {
            peer_id,
            remote_addr,
            io,
        }
    }
}

/// Stream handler for `/ipfs/bitswap/1.2.0`.
///
/// The transport hands every new stream to `on_start_initiator` or
/// `on_start_responder`; both sides speak the same protocol and differ only
/// in the counters they feed.
pub struct BitswapProtocol<B> {
    engine: Engine<B>,
    metrics: Arc<BitswapMetrics>,
}

impl<B> Clone for BitswapProtocol<B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B: Blockstore> BitswapProtocol<B> {
    pub fn new(engine: Engine<B>, metrics: BitswapMetrics) -> Self {
        Self {
            engine,
            metrics: Arc::new(metrics),
        }
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn metrics(&self) -> &BitswapMetrics {
        &self.metrics
    }

    /// Serve a stream we opened
    pub fn on_start_initiator<S>(&self, stream: PeerStream<S>) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.start(stream, Direction::Initiator)
    }

    /// Serve a stream the remote opened
    pub fn on_start_responder<S>(&self, stream: PeerStream<S>) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.start(stream, Direction::Responder)
    }

    fn start<S>(&self, stream: PeerStream<S>, direction: Direction) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let handler = self.clone();
        tokio::spawn(async move { handler.run(stream, direction).await })
    }

    /// Drive one stream until it ends.
    ///
    /// Returns the error that closed it, if any. The engine forgets the stream
    /// either way.
    async fn run<S>(self, stream: PeerStream<S>, direction: Direction) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let PeerStream {
            peer_id,
            remote_addr,
            io,
        } = stream;
        let max_message_size = self.engine.config().max_message_size;
        let counters = self.metrics.direction(direction).clone();

        let (reader, mut writer) = tokio::io::split(io);
        let (connection, mut frames) = Connection::new(peer_id, remote_addr, max_message_size);
        let conn_id = connection.id();

        // Cancelled when the engine closes the connection or the writer stops
        let closed = connection.closed_token();

        {
            let closed = closed.clone();
            let sent = counters.sent.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = closed.cancelled() => break,
                        frame = frames.recv() => match frame {
                            Some(frame) => frame,
                            None => break,
                        },
                    };

                    let written = tokio::select! {
                        _ = closed.cancelled() => break,
                        written = writer.write_all(&frame) => written,
                    };
                    if let Err(e) = written {
                        debug!("Write to {} failed: {}", peer_id, e);
                        break;
                    }
                    sent.inc_by(frame.len() as u64);
                }
                let _ = writer.shutdown().await;
                closed.cancel();
            });
        }

        info!("Bitswap {} stream {} with {} open", direction, conn_id, peer_id);
        self.engine.add_connection(connection);

        let mut framed = FramedRead::new(reader, BitswapCodec::new(max_message_size));
        let result = loop {
            tokio::select! {
                _ = closed.cancelled() => break Ok(()),
                next = framed.next() => match next {
                    Some(Ok((message, frame_len))) => {
                        counters.received.inc_by(frame_len as u64);
                        self.engine.receive_message(&peer_id, conn_id, message).await;
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },
            }
        };

        match &result {
            Ok(()) => debug!("Stream {} with {} ended", conn_id, peer_id),
            Err(e) => warn!("Closing stream {} with {}: {}", conn_id, peer_id, e),
        }

        // Cancels `closed`, which ends the writer
        self.engine.close_connection(&peer_id, conn_id);
        result
    }
}
