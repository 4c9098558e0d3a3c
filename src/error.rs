use thiserror::Error;

#[derive(Error, Debug)]
pub enum BitswapError {
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Block too large: {size} bytes (max {max})")]
    BlockTooLarge { size: usize, max: usize },

    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Blockstore error: {0}")]
    StoreError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Want cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BitswapError {
    /// Errors that are fatal to the stream they occurred on
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            BitswapError::ProtocolError(_)
                | BitswapError::MessageTooLarge { .. }
                | BitswapError::DecodeError(_)
                | BitswapError::InvalidCid(_)
        )
    }
}

impl From<cid::Error> for BitswapError {
    fn from(err: cid::Error) -> Self {
        BitswapError::InvalidCid(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BitswapError>;
