//! Plain TCP transport: one bitswap stream per connection, opened with a
//! protocol handshake.

mod handshake;

pub use handshake::{exchange, Handshake, HANDSHAKE_LEN};

use crate::error::{BitswapError, Result};
use crate::peer::PeerId;
use crate::protocol::{BitswapProtocol, PeerStream};
use crate::storage::Blockstore;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `addr` and serve the stream as initiator
pub async fn dial<B: Blockstore>(
    protocol: &BitswapProtocol<B>,
    local: PeerId,
    addr: SocketAddr,
) -> Result<(PeerId, JoinHandle<Result<()>>)> {
    info!("Connecting to peer: {}", addr);

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| BitswapError::Timeout(CONNECT_TIMEOUT))?
        .map_err(|e| BitswapError::TransportError(format!("Failed to connect to {}: {}", addr, e)))?;
    stream.set_nodelay(true)?;

    let peer_id = timeout(HANDSHAKE_TIMEOUT, exchange(&mut stream, local))
        .await
        .map_err(|_| BitswapError::Timeout(HANDSHAKE_TIMEOUT))??;

    info!("Connected to peer {} at {}", peer_id, addr);
    let handle = protocol.on_start_initiator(PeerStream::new(peer_id, addr, stream));
    Ok((peer_id, handle))
}

/// Accepts inbound TCP connections and serves them as responder
pub struct Listener {
    inner: TcpListener,
    local: PeerId,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, local: PeerId) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        info!("Listening on {}", inner.local_addr()?);
        Ok(Self { inner, local })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve<B: Blockstore>(self, protocol: BitswapProtocol<B>, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.inner.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let protocol = protocol.clone();
            let local = self.local;
            tokio::spawn(async move {
                if let Err(e) = accept(protocol, local, stream, addr).await {
                    warn!("Rejected connection from {}: {}", addr, e);
                }
            });
        }

        debug!("Listener stopped");
    }
}

async fn accept<B: Blockstore>(
    protocol: BitswapProtocol<B>,
    local: PeerId,
    mut stream: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    stream.set_nodelay(true)?;

    let peer_id = timeout(HANDSHAKE_TIMEOUT, exchange(&mut stream, local))
        .await
        .map_err(|_| BitswapError::Timeout(HANDSHAKE_TIMEOUT))??;

    info!("Accepted peer {} from {}", peer_id, addr);
    protocol.on_start_responder(PeerStream::new(peer_id, addr, stream));
    Ok(())
}
