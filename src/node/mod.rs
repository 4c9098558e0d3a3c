use crate::block::{Block, RAW};
use crate::config::BitswapConfig;
use crate::engine::Engine;
use crate::error::{BitswapError, Result};
use crate::peer::{fits_in_message, PeerId};
use crate::protocol::{BitswapMetrics, BitswapProtocol};
use crate::storage::FsBlockstore;
use crate::transport::{self, Listener};
use bytes::Bytes;
use cid::Cid;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for a bitswap node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Accept inbound connections here; `None` runs dial-only
    pub listen_addr: Option<SocketAddr>,
    /// Peers to dial on start
    pub peers: Vec<SocketAddr>,
    pub store_dir: PathBuf,
    pub bitswap: BitswapConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            peers: Vec::new(),
            store_dir: PathBuf::from("./blocks"),
            bitswap: BitswapConfig::default(),
        }
    }
}

/// A blockstore on disk, an engine, and the TCP transport feeding it
pub struct Node {
    peer_id: PeerId,
    protocol: BitswapProtocol<FsBlockstore>,
    registry: Registry,
    listen_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
}

impl Node {
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let peer_id = PeerId::random();
        info!("Node initialized with peer_id: {}", peer_id);

        let store = FsBlockstore::open(&config.store_dir).await?;
        let engine = Engine::new(Arc::new(store), config.bitswap.clone());

        let registry = Registry::new();
        let metrics = BitswapMetrics::new(&registry)?;
        let protocol = BitswapProtocol::new(engine, metrics);
        let shutdown = CancellationToken::new();

        let listen_addr = match config.listen_addr {
            Some(addr) => {
                let listener = Listener::bind(addr, peer_id).await?;
                let bound = listener.local_addr()?;
                tokio::spawn(listener.serve(protocol.clone(), shutdown.clone()));
                Some(bound)
            }
            None => None,
        };

        let node = Self {
            peer_id,
            protocol,
            registry,
            listen_addr,
            shutdown,
        };

        for addr in &config.peers {
            // Unreachable peers don't stop the node
            if let Err(e) = node.connect(*addr).await {
                warn!("Failed to connect to {}: {}", addr, e);
            }
        }

        Ok(node)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Address actually bound, if listening
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn engine(&self) -> &Engine<FsBlockstore> {
        self.protocol.engine()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerId> {
        let (peer_id, _stream) = transport::dial(&self.protocol, self.peer_id, addr).await?;
        Ok(peer_id)
    }

    /// Store a file's contents as one raw block.
    ///
    /// Fails with `BlockTooLarge` if the block couldn't be sent in a single
    /// message.
    pub async fn put_file(&self, path: &Path) -> Result<Cid> {
        let data = tokio::fs::read(path).await?;
        let block = Block::new(data, RAW);

        let max = self.engine().config().max_message_size;
        if !fits_in_message(&block, max) {
            return Err(BitswapError::BlockTooLarge {
                size: block.size(),
                max,
            });
        }

        info!("Adding {} ({} bytes)", path.display(), block.size());
        self.engine().put(block.data().clone(), RAW).await
    }

    /// Read `cid` locally or fetch it from connected peers, giving up after
    /// `timeout`
    pub async fn fetch(&self, cid: &Cid, timeout: Duration) -> Result<Bytes> {
        info!("Fetching {} ({} peers connected)", cid, self.engine().connected_peers().len());
        tokio::time::timeout(timeout, self.engine().get(cid))
            .await
            .map_err(|_| BitswapError::Timeout(timeout))?
    }

    /// Prometheus text exposition of the node's counters
    pub fn metrics_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| BitswapError::ProtocolError(e.to_string()))
    }

    /// Stop listening, cancel wants and close every stream
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.engine().shutdown();
        info!("Node {} stopped", self.peer_id);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
