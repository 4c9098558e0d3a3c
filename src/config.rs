use crate::MAX_MESSAGE_SIZE;

/// Tunables shared by the engine, connections and the wire codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitswapConfig {
    /// Largest protobuf body accepted or produced, in bytes
    pub max_message_size: usize,
    /// Ask peers to answer our WANT-BLOCK entries with DONT_HAVE
    pub send_dont_have: bool,
    /// Priority attached to local wants that don't specify one
    pub default_priority: i32,
}

impl Default for BitswapConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            send_dont_have: false,
            default_priority: 1,
        }
    }
}
