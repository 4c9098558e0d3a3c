use crate::error::{BitswapError, Result};
use crate::peer::PeerId;
use crate::PROTOCOL_ID;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// 1 + 19 + 32 bytes
pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_ID.len() + 32;

/// Stream preamble naming the protocol and the sender's peer ID.
/// Format: <protocol id length><protocol id><peer id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);
        buf.push(PROTOCOL_ID.len() as u8);
        buf.extend_from_slice(PROTOCOL_ID.as_bytes());
        buf.extend_from_slice(self.peer_id.as_bytes());
        buf
    }

    /// Parse a handshake; the protocol ID must match exactly
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_LEN {
            return Err(BitswapError::TransportError("Handshake too short".to_string()));
        }

        let id_len = data[0] as usize;
        let protocol = data.get(1..1 + id_len).unwrap_or_default();
        if protocol != PROTOCOL_ID.as_bytes() {
            return Err(BitswapError::TransportError(format!(
                "Unsupported protocol {:?}",
                String::from_utf8_lossy(protocol)
            )));
        }

        let peer_id = PeerId::from_slice(&data[1 + id_len..HANDSHAKE_LEN])?;
        Ok(Self { peer_id })
    }
}

/// Send our handshake and read the remote one, returning the remote peer ID
pub async fn exchange<S>(stream: &mut S, local: PeerId) -> Result<PeerId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&Handshake::new(local).to_bytes()).await?;

    let mut buf = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut buf).await?;
    let remote = Handshake::from_bytes(&buf)?;

    if remote.peer_id == local {
        return Err(BitswapError::TransportError("Connected to self".to_string()));
    }

    debug!("Handshake with {} complete", remote.peer_id);
    Ok(remote.peer_id)
}
