//! Bitswap 1.2.0 block exchange: wire codec, per-peer ledgers, the engine
//! routing wants and blocks between peers and a blockstore, and a small TCP
//! transport to run it on.

pub mod block;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod transport;

pub use block::Block;
pub use config::BitswapConfig;
pub use engine::{Engine, EngineStats, WantHandle};
pub use error::{BitswapError, Result};
pub use message::{BitswapCodec, BlockPresence, Message, WantEntry, WantType, Wantlist};
pub use peer::{Connection, PeerId};
pub use protocol::{BitswapMetrics, BitswapProtocol, PeerStream};
pub use storage::{Blockstore, FsBlockstore, MemoryBlockstore};

/// Protocol identifier negotiated on every stream
pub const PROTOCOL_ID: &str = "/ipfs/bitswap/1.2.0";

/// Largest message body accepted or sent
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;
