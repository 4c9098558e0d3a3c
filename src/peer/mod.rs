mod connection;

pub use connection::{fits_in_message, Connection, OutboundFrames, OUTBOUND_QUEUE_FRAMES};

use crate::error::{BitswapError, Result};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a remote node, assigned by the transport
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            BitswapError::ProtocolError(format!("Peer ID must be 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable
        write!(f, "PeerId({})", &hex::encode(self.0)[..12])
    }
}

impl FromStr for PeerId {
    type Err = BitswapError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| BitswapError::ProtocolError(format!("Invalid peer ID: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

/// Identifies one stream to a peer; a peer may have several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a connection, driven by the stream it wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream opened, not yet registered with the engine
    Opening,
    /// Messages may be sent and received
    Open,
    /// Teardown started
    Closing,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_hex_roundtrip() {
        let peer = PeerId::random();
        let parsed: PeerId = peer.to_string().parse().unwrap();
        assert_eq!(parsed, peer);
        assert_eq!(peer.to_string().len(), 64);
    }

    #[test]
    fn test_peer_id_wrong_length() {
        assert!(PeerId::from_slice(&[1u8; 20]).is_err());
        assert!("abcd".parse::<PeerId>().is_err());
    }
}
